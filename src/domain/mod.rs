pub mod course;
pub mod invoice;
pub mod payment;

pub use course::*;
pub use invoice::*;
pub use payment::*;
