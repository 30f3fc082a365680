// Entity models: accounts and the representative rosters they rotate between

pub mod account;
pub mod representative;

pub use account::{
    apply_overrides, dedupe_accounts, Account, TaxIdRoot, Transfer, TAX_ID_ROOT_LEN,
};
pub use representative::{ClassificationRule, Roster, DEFAULT_CAPACITY};
