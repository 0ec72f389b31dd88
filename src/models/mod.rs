pub mod alert;

pub use alert::AlertRecord;
#[cfg(test)]
pub use alert::Location;
