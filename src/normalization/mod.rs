pub mod numeric;
pub mod rating;
