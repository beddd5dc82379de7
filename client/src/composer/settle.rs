use crate::{
    composer::{Batch, Composer},
    error::DexResult,
};

/// Build the transaction moving free balances back to the owner's wallets.
///
/// A missing destination wallet is created first. A wrapped native destination is closed afterwards so the
/// owner receives plain lamports.
pub fn compose(composer: &Composer) -> DexResult<Batch> {
    let open_orders = composer.require_open_orders()?;
    let setup = composer.setup(0, 0, false)?;
    let settle = composer.settle_instruction(&open_orders, &setup.base_wallet, &setup.quote_wallet)?;
    Ok(setup.into_batch(vec![settle]))
}
