use serde::{Deserialize, Serialize};

use branchstock_core::{AggregateId, DomainError, DomainResult, ProductId};

/// Identifier of a sale owned by the external sale flow.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SaleId(pub AggregateId);

impl SaleId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SaleId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Sale line as far as stock is concerned: product and sold quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

impl SaleLine {
    pub fn new(product_id: ProductId, quantity: i64) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// Signed quantity change for one product.
///
/// `line` is the index of the first input line naming the product, used to
/// report which line of the sale failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockDelta {
    pub product_id: ProductId,
    pub delta: i64,
    pub line: usize,
}

/// Validate lines and merge those naming the same product.
///
/// Order of first appearance is kept. Any quantity ≤ 0 rejects the whole set.
pub fn merge_lines(lines: &[SaleLine]) -> DomainResult<Vec<StockDelta>> {
    let mut merged: Vec<StockDelta> = Vec::with_capacity(lines.len());

    for (idx, line) in lines.iter().enumerate() {
        if line.quantity <= 0 {
            return Err(DomainError::invalid_quantity(format!(
                "sold quantity for product {} must be positive",
                line.product_id
            ))
            .at_line(idx));
        }

        match merged.iter_mut().find(|d| d.product_id == line.product_id) {
            Some(existing) => {
                existing.delta = existing
                    .delta
                    .checked_add(line.quantity)
                    .ok_or_else(|| DomainError::invalid_quantity("sale quantity overflows").at_line(idx))?;
            }
            None => merged.push(StockDelta {
                product_id: line.product_id,
                delta: line.quantity,
                line: idx,
            }),
        }
    }

    Ok(merged)
}

/// Deltas for a new sale: one debit per product.
pub fn debit_deltas(lines: &[SaleLine]) -> DomainResult<Vec<StockDelta>> {
    Ok(merge_lines(lines)?
        .into_iter()
        .map(|d| StockDelta { delta: -d.delta, ..d })
        .collect())
}

/// Deltas for a cancelled, deleted or returned sale: credit back what was sold.
pub fn restore_deltas(lines: &[SaleLine]) -> DomainResult<Vec<StockDelta>> {
    merge_lines(lines)
}

/// Deltas for an edited sale.
///
/// Per product, stock moves by `old - new` sold quantity: selling more debits,
/// selling less credits. Products whose sold quantity did not change are
/// omitted. `line` refers to the position in `new` when the product is
/// present there, else in `old`.
pub fn edit_deltas(old: &[SaleLine], new: &[SaleLine]) -> DomainResult<Vec<StockDelta>> {
    let before = merge_lines(old)?;
    let after = merge_lines(new)?;

    let mut out = Vec::new();

    for b in &before {
        let now = after.iter().find(|a| a.product_id == b.product_id);
        let sold_now = now.map(|a| a.delta).unwrap_or(0);
        let delta = b.delta - sold_now;
        if delta != 0 {
            out.push(StockDelta {
                product_id: b.product_id,
                delta,
                line: now.map(|a| a.line).unwrap_or(b.line),
            });
        }
    }

    for a in &after {
        if !before.iter().any(|b| b.product_id == a.product_id) {
            out.push(StockDelta {
                product_id: a.product_id,
                delta: -a.delta,
                line: a.line,
            });
        }
    }

    Ok(out)
}
