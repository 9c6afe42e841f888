pub mod bits;
pub mod flag;
pub mod flags;

pub use self::bits::*;
pub use self::flag::*;
pub use self::flags::*;
