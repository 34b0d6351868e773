//! Route inbound customer messages to support agents.
//!
//! Pipeline per notification:
//! 1. [`Deduplicator`]: drop messages already seen from this customer
//! 2. [`SessionDirector`]: keep the customer's current agent while it is online
//! 3. [`AgentRegistry`]: otherwise pick the least loaded online agent
//! 4. [`AssignmentCoordinator`]: commit the assignment atomically per customer
//!    and hand it to a [`DeliverySink`]
//!
//! All state lives in a shared [`switchboard_store::StateStore`].

pub mod coordinator;
pub mod dedup;
pub mod director;
pub mod error;
pub mod keys;
pub mod registry;
pub mod select;
pub mod sink;

pub use {
    coordinator::{AssignmentCoordinator, AssignmentCoordinatorBuilder, AssignmentOutcome, Snapshot},
    dedup::{Deduplicator, Registration, archived_field, fingerprint},
    director::{Affinity, SessionDirector},
    error::{Error, Result},
    keys::Keyspace,
    registry::AgentRegistry,
    select::{FirstCandidate, RandomTieBreak, TieBreak},
    sink::{ChannelSink, DeliverySink, LogSink, RecordingSink, SinkError},
};
