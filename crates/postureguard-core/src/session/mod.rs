//! Work and break sessions: the data model, the lifecycle state machine and
//! the coordinator that ties timer, posture input and statistics together.

mod coordinator;
mod model;
mod settings;
mod sink;
mod snapshot;
mod state_machine;

pub use coordinator::{SessionCoordinator, SessionTicket};
pub use model::{Session, SessionId, SessionKind};
pub use settings::SessionSettings;
pub use sink::{MemorySink, StatisticsSink};
pub use snapshot::SessionSnapshot;
pub use state_machine::{LifecycleState, SessionStateMachine};
