use crate::scope::Bag;
use crate::value::Value;

/// Cartesian expansion of list-valued entries. The first list-valued key varies
/// slowest; an empty list yields no bag at all.
pub fn expand(bag: &Bag) -> Vec<Bag> {
    let mut out = vec![Bag::new()];
    for (key, value) in bag {
        match value {
            Value::List(items) => {
                let mut next = Vec::with_capacity(out.len() * items.len());
                for partial in &out {
                    for item in items {
                        let mut combo = partial.clone();
                        combo.insert(key.clone(), item.clone());
                        next.push(combo);
                    }
                }
                out = next;
            }
            other => {
                for partial in &mut out {
                    partial.insert(key.clone(), other.clone());
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::bag;

    #[test]
    fn scalars_pass_through() {
        let input = bag([("kind", "analysis"), ("model", "arpege")]);
        assert_eq!(expand(&input), vec![input]);
    }

    #[test]
    fn lists_expand_in_input_order() {
        let mut input = bag([("kind", "analysis")]);
        input.insert("date".into(), Value::from(vec!["2024010100", "2024010200"]));
        input.insert("term".into(), Value::from(vec![0, 6]));
        let combos = expand(&input);
        let rendered: Vec<String> = combos
            .iter()
            .map(|combo| format!("{}/{}", combo["date"], combo["term"]))
            .collect();
        assert_eq!(
            rendered,
            vec![
                "2024010100/0",
                "2024010100/6",
                "2024010200/0",
                "2024010200/6"
            ]
        );
        assert!(combos.iter().all(|combo| combo["kind"] == Value::str("analysis")));
    }

    #[test]
    fn empty_list_yields_nothing() {
        let mut input = bag([("kind", "analysis")]);
        input.insert("date".into(), Value::List(Vec::new()));
        assert!(expand(&input).is_empty());
    }
}
