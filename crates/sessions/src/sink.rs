use crate::record::SessionRecord;

/// Receives session association changes when a record is transmitted,
/// typically the HTTP response writing or clearing a session cookie.
pub trait SessionSink {
    /// A newly created session must be associated with the client.
    fn attach(&mut self, session: &SessionRecord);

    /// A previously associated session became invalid; clear it client-side.
    fn detach(&mut self, session: &SessionRecord);
}
