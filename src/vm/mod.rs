pub mod create;
pub mod spec;

pub use create::create_vm;
pub use spec::VmSpecification;
