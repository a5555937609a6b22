mod bindings;
mod handle;
mod interning;
mod reg;
mod report;
mod shadow;
mod types;
mod val;

pub use bindings::*;
pub use handle::*;
pub use interning::*;
pub use reg::*;
pub use report::*;
pub use shadow::*;
pub use types::*;
pub use val::*;
