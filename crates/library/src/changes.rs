use common::{ChangeSet, Field, Record};

/// Fields in `fields` whose value in `current` differs from `staged`.
///
/// A field present on only one side is a change: appearing maps to the new
/// value, disappearing maps to `None`.
pub fn diff(staged: &Record, current: &Record, fields: &[Field]) -> ChangeSet {
    let mut changes = ChangeSet::new();
    for field in fields {
        let before = staged.get(field);
        let after = current.get(field);
        if before != after {
            changes.insert(*field, after.cloned());
        }
    }
    changes
}

#[cfg(test)]
mod tests {
    use common::{Field, Record, Value};

    use super::diff;

    fn record(pairs: &[(Field, Value)]) -> Record {
        pairs.iter().cloned().collect()
    }

    #[test]
    fn reports_changed_added_and_removed_fields() {
        let staged = record(&[
            (Field::Title, Value::text("Old")),
            (Field::Genre, Value::text("Rock")),
            (Field::Year, Value::Integer(1999)),
        ]);
        let current = record(&[
            (Field::Title, Value::text("New")),
            (Field::Year, Value::Integer(1999)),
            (Field::Album, Value::text("Fresh")),
        ]);
        let fields = [Field::Title, Field::Genre, Field::Year, Field::Album];
        let changes = diff(&staged, &current, &fields);
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[&Field::Title], Some(Value::text("New")));
        assert_eq!(changes[&Field::Genre], None);
        assert_eq!(changes[&Field::Album], Some(Value::text("Fresh")));
        assert!(!changes.contains_key(&Field::Year));
    }

    #[test]
    fn ignores_fields_outside_the_writable_set() {
        let staged = record(&[(Field::Bitrate, Value::Integer(128))]);
        let current = record(&[(Field::Bitrate, Value::Integer(320))]);
        assert!(diff(&staged, &current, &[Field::Title]).is_empty());
    }

    #[test]
    fn setting_the_staged_value_back_is_not_a_change() {
        let staged = record(&[(Field::Title, Value::text("Same"))]);
        let current = staged.clone();
        assert!(diff(&staged, &current, &[Field::Title]).is_empty());
    }
}
