pub mod golden;
pub mod run;
pub mod validate;
