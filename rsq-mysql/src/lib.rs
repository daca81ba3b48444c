mod driver;
mod value_wrap;

pub use driver::*;
