// Commerce: carts, checkout sessions and payment reconciliation
pub mod commerce;
