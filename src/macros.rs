#[cfg(feature = "log")]
#[macro_use]
mod log {
    macro_rules! evq_log {
        (trace, $($arg:expr),*) => { ::log::trace!(target: "ph_event_queue", $($arg),*); };
        (debug, $($arg:expr),*) => { ::log::debug!(target: "ph_event_queue", $($arg),*); };
    }
}

#[cfg(not(feature = "log"))]
#[macro_use]
mod log {
    macro_rules! evq_log {
        ($level:ident, $($arg:expr),*) => { $( let _ = $arg; )* }
    }
}

macro_rules! evq_trace {
    ($($arg:expr),*) => (evq_log!(trace, $($arg),*));
}

macro_rules! evq_debug {
    ($($arg:expr),*) => (evq_log!(debug, $($arg),*));
}
