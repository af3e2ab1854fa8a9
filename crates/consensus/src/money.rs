//! Monetary units.

pub type Amount = i64;

pub const COIN: Amount = 100_000_000;

/// Converts atoms to whole coins. Ticket prices and fees are stored this way.
pub fn atoms_to_coin(atoms: Amount) -> f64 {
    atoms as f64 / COIN as f64
}
