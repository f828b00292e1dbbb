use std::fmt::Debug;

use crate::RaftLog;
use crate::StateMachine;
use crate::StateStorage;
use crate::Transport;

/// Selects the storage, network and application implementations a node is
/// built from.
pub trait TypeConfig:
    Sync + Send + Sized + Debug + Clone + Copy + Default + Eq + PartialEq + Ord + PartialOrd + 'static
{
    type R: RaftLog;

    type TR: Transport;

    type SM: StateMachine;

    type SS: StateStorage;
}

pub mod alias {
    use super::TypeConfig;

    pub type ROF<T> = <T as TypeConfig>::R;

    pub type TROF<T> = <T as TypeConfig>::TR;

    pub type SMOF<T> = <T as TypeConfig>::SM;

    pub type SSOF<T> = <T as TypeConfig>::SS;
}
