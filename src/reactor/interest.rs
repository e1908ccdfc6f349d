//! Flag sets used when registering handles and driving a dispatch.

use bitflags::bitflags;

bitflags! {
    /// Readiness a handle is watched for, or was raised with.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InputMode: u8 {
        /// Readable, or the peer hung up.
        const READ = 1;
        /// Writable.
        const WRITE = 1 << 1;
        /// Out-of-band data or an error condition.
        const EXCEPT = 1 << 2;
    }
}

bitflags! {
    /// Event sources taking part in one `dispatch` call.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DispatchFlags: u8 {
        const SIGNALS = 1;
        const TIMERS = 1 << 1;
        const IDLE = 1 << 2;
        /// Native platform events (event dispatcher only).
        const EVENTS = 1 << 3;
        /// Registered handles.
        const OTHER = 1 << 4;
        const ALL = Self::SIGNALS.bits()
            | Self::TIMERS.bits()
            | Self::IDLE.bits()
            | Self::EVENTS.bits()
            | Self::OTHER.bits();
    }
}

impl Default for DispatchFlags {
    fn default() -> Self {
        DispatchFlags::ALL
    }
}
