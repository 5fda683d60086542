mod work_model;
pub use work_model::WorkModel;

mod launch;
pub use launch::Launch;
