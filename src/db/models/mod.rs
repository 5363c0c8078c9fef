pub mod plan;
pub mod sell_mode;
pub mod stats;

pub use self::plan::*;
pub use self::sell_mode::*;
pub use self::stats::*;
