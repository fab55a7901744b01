//! Background work that runs beside the cache: delivering change
//! notifications to a registered listener.

pub(crate) mod notifier;
