//! Default execution-context contract.

use aic_chip::context;

use crate::metadata::{ExecContext, ExecContextField};

/// Contract for a program that relies on every slot of the current layout.
#[must_use]
pub fn default_exec_context() -> ExecContext {
    ExecContext {
        size: context::block_size(),
        fields: context::FIELDS
            .iter()
            .map(|f| ExecContextField {
                name: f.name.to_owned(),
                size: f.size,
                offset: f.offset,
                required: true,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_slot_is_required() {
        let ctx = default_exec_context();
        assert_eq!(ctx.fields.len(), context::FIELDS.len());
        assert!(ctx.fields.iter().all(|f| f.required));
        let heap = ctx
            .fields
            .iter()
            .find(|f| f.name == "networkHeapSize")
            .unwrap();
        assert_eq!((heap.offset, heap.size), (96, 8));
        assert_eq!(ctx.size, 140);
    }
}
