//! ReorderEngine - 並び替え順序の計算
//!
//! 純粋関数のみ。TaskStore には触れず、呼び出し側が結果を
//! `TaskStore::reorder` で適用します。

use crate::domain::{ErrandError, TaskId};

/// Move `source` to the index currently held by `target` (list splice).
///
/// Dragging down lands the source after the target; dragging up lands it before.
/// Either id missing from `current` is `UnknownId`.
pub fn compute_order(
    current: &[TaskId],
    source: TaskId,
    target: TaskId,
) -> Result<Vec<TaskId>, ErrandError> {
    let from = index_of(current, source)?;
    let to = index_of(current, target)?;

    let mut order = current.to_vec();
    if from == to {
        return Ok(order);
    }
    let moved = order.remove(from);
    order.insert(to, moved);
    Ok(order)
}

fn index_of(order: &[TaskId], id: TaskId) -> Result<usize, ErrandError> {
    order
        .iter()
        .position(|candidate| *candidate == id)
        .ok_or(ErrandError::UnknownId(id))
}
