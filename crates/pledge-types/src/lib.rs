pub mod account;
pub mod amount;
pub mod error;

pub use account::AccountAddress;
pub use amount::{PledgeAmount, PLEDGE_BASE_UNIT, PLEDGE_DECIMALS};
pub use error::{EscrowError, Result};
