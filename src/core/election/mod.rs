mod election_handler;

pub(crate) use election_handler::*;


/// Changes to the persistent state decided while handling a vote request.
///
/// `term_update` is set whenever the request carries a higher term, even if
/// the vote itself is denied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct StateUpdate {
    pub(crate) term_update: Option<u64>,
    pub(crate) new_voted_for: Option<u32>,
}
