use std::mem;

use plover_protocol as protocol;
use protocol::{Diff, DiffEdit};

#[derive(Debug)]
pub(crate) struct Edits(Vec<DiffEdit>);

impl Edits {
    pub(crate) fn new() -> Edits {
        Edits(Vec::new())
    }

    /// Append an edit to this sequence, collapsing it into the last edit if
    /// possible.
    ///
    /// The collapsing handles conversion of a run of inserts to a
    /// multi-insert and fusing of consecutive removes at one index.
    pub(crate) fn append_edit(&mut self, edit: DiffEdit) {
        let edit = match (self.0.pop(), edit) {
            (None, edit) => edit,
            (
                Some(DiffEdit::SingleElementInsert {
                    index,
                    elem_id,
                    op_id,
                    value: Diff::Value(value),
                }),
                DiffEdit::SingleElementInsert {
                    index: next_index,
                    elem_id: next_elem_id,
                    op_id: next_op_id,
                    value: Diff::Value(next_value),
                },
            ) if index + 1 == next_index
                && elem_id.as_opid() == Some(&op_id)
                && next_elem_id.as_opid() == Some(&next_op_id)
                // only values of a common type fuse
                && mem::discriminant(&value) == mem::discriminant(&next_value)
                && op_id.delta(&next_op_id, 1) =>
            {
                DiffEdit::MultiElementInsert {
                    index,
                    elem_id,
                    values: vec![value, next_value],
                }
            }
            (
                Some(DiffEdit::MultiElementInsert {
                    index,
                    elem_id,
                    mut values,
                }),
                DiffEdit::SingleElementInsert {
                    index: next_index,
                    elem_id: next_elem_id,
                    op_id,
                    value: Diff::Value(value),
                },
            ) if index + (values.len() as u64) == next_index
                && next_elem_id.as_opid() == Some(&op_id)
                && mem::discriminant(&values[0]) == mem::discriminant(&value)
                && elem_id
                    .as_opid()
                    .map_or(false, |e| e.delta(&op_id, values.len() as u64)) =>
            {
                values.push(value);
                DiffEdit::MultiElementInsert {
                    index,
                    elem_id,
                    values,
                }
            }
            (
                Some(DiffEdit::Remove { index, count }),
                DiffEdit::Remove {
                    index: new_index,
                    count: new_count,
                },
            ) if index == new_index => DiffEdit::Remove {
                index,
                count: count + new_count,
            },
            (Some(last), edit) => {
                self.0.push(last);
                edit
            }
        };
        self.0.push(edit);
    }

    pub(crate) fn into_vec(self) -> Vec<DiffEdit> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use std::convert::TryInto;

    use protocol::{ElementId, OpId};

    use super::*;

    fn opid(s: &str) -> OpId {
        s.try_into().unwrap()
    }

    #[test]
    fn consecutive_inserts_fuse_to_multi_insert() {
        let mut edits = Edits::new();
        edits.append_edit(DiffEdit::SingleElementInsert {
            index: 0,
            elem_id: ElementId::Id(opid("2@aa")),
            op_id: opid("2@aa"),
            value: Diff::Value("a".into()),
        });
        edits.append_edit(DiffEdit::SingleElementInsert {
            index: 1,
            elem_id: ElementId::Id(opid("3@aa")),
            op_id: opid("3@aa"),
            value: Diff::Value("b".into()),
        });
        assert_eq!(
            edits.into_vec(),
            vec![DiffEdit::MultiElementInsert {
                index: 0,
                elem_id: ElementId::Id(opid("2@aa")),
                values: vec!["a".into(), "b".into()],
            }]
        );
    }

    #[test]
    fn consecutive_removes_fuse() {
        let mut edits = Edits::new();
        edits.append_edit(DiffEdit::Remove { index: 3, count: 1 });
        edits.append_edit(DiffEdit::Remove { index: 3, count: 1 });
        assert_eq!(
            edits.into_vec(),
            vec![DiffEdit::Remove { index: 3, count: 2 }]
        );
    }

    #[test]
    fn inserts_from_different_runs_stay_single() {
        let mut edits = Edits::new();
        edits.append_edit(DiffEdit::SingleElementInsert {
            index: 0,
            elem_id: ElementId::Id(opid("2@aa")),
            op_id: opid("2@aa"),
            value: Diff::Value("a".into()),
        });
        edits.append_edit(DiffEdit::SingleElementInsert {
            index: 1,
            elem_id: ElementId::Id(opid("9@bb")),
            op_id: opid("9@bb"),
            value: Diff::Value("b".into()),
        });
        assert_eq!(edits.into_vec().len(), 2);
    }
}
