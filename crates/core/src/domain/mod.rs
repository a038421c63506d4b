pub mod call;
pub mod descriptor;
pub mod outcome;
