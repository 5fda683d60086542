mod logger;
pub use logger::*;

mod title;
pub use title::ProcTitle;
