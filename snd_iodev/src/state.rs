//! The IoDev state machine: `Closed → Open → NormalRun ⇄ NoStreamRun →
//! Closed`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevState {
    Closed,
    Open,
    NormalRun,
    /// Device stays open with no attached stream, fed with silence, to keep
    /// the DMA pipeline (or paced socket) warm.
    NoStreamRun,
}

impl DevState {
    /// `true` if `configure` is the only valid next call.
    pub fn is_closed(self) -> bool {
        matches!(self, DevState::Closed)
    }

    /// Whether the device currently has at least one stream attached.
    pub fn is_running(self) -> bool {
        matches!(self, DevState::NormalRun)
    }

    pub fn on_configure(self) -> Self {
        DevState::Open
    }

    pub fn on_stream_attached(self) -> Self {
        match self {
            DevState::Open | DevState::NoStreamRun | DevState::NormalRun => DevState::NormalRun,
            DevState::Closed => DevState::Closed,
        }
    }

    /// Last stream detached; device stays open to absorb silence.
    pub fn on_last_stream_detached(self) -> Self {
        match self {
            DevState::NormalRun => DevState::NoStreamRun,
            other => other,
        }
    }

    pub fn on_close(self) -> Self {
        DevState::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_lifecycle_transitions() {
        let mut s = DevState::Closed;
        s = s.on_configure();
        assert_eq!(s, DevState::Open);
        s = s.on_stream_attached();
        assert_eq!(s, DevState::NormalRun);
        s = s.on_last_stream_detached();
        assert_eq!(s, DevState::NoStreamRun);
        s = s.on_stream_attached();
        assert_eq!(s, DevState::NormalRun);
        s = s.on_close();
        assert_eq!(s, DevState::Closed);
    }

    #[test]
    fn detaching_from_no_stream_run_is_a_noop() {
        let s = DevState::NoStreamRun;
        assert_eq!(s.on_last_stream_detached(), DevState::NoStreamRun);
    }
}
