use crate::{
    composer::{cancel_order::cancel_instruction, split_batches, Batch, Composer},
    error::{ComposeError, DexResult},
    state::OpenOrder,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Params {
    pub orders: Vec<OpenOrder>,
}

/// Build the transactions cancelling every given order.
///
/// Cancels are packed greedily: the size ceiling applies to the setup and cancels of a batch, measured before
/// the trailing settle and closures are appended. Every batch ends with a settle, setup goes in the first batch
/// only and wrapped native closures in the last one.
pub fn compose(composer: &Composer, params: &Params) -> DexResult<Vec<Batch>> {
    if params.orders.is_empty() {
        return Err(ComposeError::NoOperations.into());
    }
    let open_orders = composer.require_open_orders()?;
    let setup = composer.setup(0, 0, false)?;
    let settle = composer.settle_instruction(&open_orders, &setup.base_wallet, &setup.quote_wallet)?;
    let cancels = params
        .orders
        .iter()
        .map(|order| cancel_instruction(composer, &open_orders, order.into()))
        .collect::<Result<Vec<_>, _>>()?;

    let chunks = split_batches(&cancels, composer.size_ceiling, |index, chunk| {
        let mut instructions = Vec::with_capacity(chunk.len() + setup.instructions.len());
        if index == 0 {
            instructions.extend_from_slice(&setup.instructions);
        }
        instructions.extend_from_slice(chunk);
        composer.measure(&instructions)
    })?;
    log::debug!(
        "Cancelling {} orders in {} transactions",
        cancels.len(),
        chunks.len()
    );

    let last = chunks.len() - 1;
    let mut setup_instructions = Some(setup.instructions);
    let mut signers = Some(setup.signers);
    let mut created = Some(setup.created);
    let mut closures = Some(setup.closures);
    let batches = chunks
        .into_iter()
        .enumerate()
        .map(|(index, chunk)| {
            let mut instructions = setup_instructions.take().unwrap_or_default();
            instructions.extend_from_slice(chunk);
            instructions.push(settle.clone());
            if index == last {
                instructions.extend(closures.take().unwrap_or_default());
            }
            Batch {
                instructions,
                signers: signers.take().unwrap_or_default(),
                created: created.take().unwrap_or_default(),
            }
        })
        .collect();
    Ok(batches)
}
