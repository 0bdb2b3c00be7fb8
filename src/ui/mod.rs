pub mod history;
pub mod overview;
