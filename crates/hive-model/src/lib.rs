mod domain;
pub use domain::*;

mod kind;
pub use kind::*;

mod descriptor;
pub use descriptor::TaskDescriptor;

mod error;
pub use error::ModelError;
