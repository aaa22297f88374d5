/// Signals broadcast to anyone subscribed through `QueueManager::subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEvent {
    /// Both lanes and the read list drained to zero.
    QueueEmpty,
    /// A dispatch timed out: the network is slow rather than gone.
    ConnectionTimedOut,
    /// A dispatch failed because the network is unreachable.
    ConnectionLost,
    /// The server asked for human verification; every lane is frozen until
    /// it is cleared.
    HumanCheckRequired,
}
