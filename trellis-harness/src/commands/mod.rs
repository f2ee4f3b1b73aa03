pub mod invoke;
pub mod stop;
