pub mod dependency;
pub mod registry;
#[allow(clippy::module_inception)]
pub mod task;
pub mod work;

// Re-export all the key structs
pub use dependency::{Declare, Dependee, DependeeKind, Dependency};
pub use registry::{TaskKey, TaskRegistry, WeakRegistry};
pub use task::{DepKey, Task, TaskBuilder, TaskFuture, TaskSnapshot, TaskState, WeakTask};
pub use work::{Resolver, Settlement, Work};
