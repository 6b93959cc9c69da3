//! Platform contracts: adapters, actions and their registry.

pub mod action;
pub mod adapter;
pub mod registry;

pub use action::{Action, BoxedAction, ChoiceOption, SendMessageParams};
pub use adapter::{Adapter, BoxedAdapter, parse_choice, str_at, str_field};
pub use registry::{Caller, PlatformRegistry, PlatformRegistryBuilder, SharedPlatforms};
