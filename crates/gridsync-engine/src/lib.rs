//! gridsync_engine - Cell references, dependency extraction and formula evaluation.

pub mod engine;

#[cfg(test)]
mod tests {
    use crate::engine::*;
    use std::collections::HashMap;

    #[test]
    fn test_evaluate_through_closure_lookup() {
        let mut cells = HashMap::new();
        cells.insert(CellRef::new(0, 0), "2".to_string());
        cells.insert(CellRef::new(0, 1), "=A1*3".to_string());
        let lookup = |cell: &CellRef| cells.get(cell).cloned();

        assert_eq!(evaluate("=B1+A1", &lookup), Value::Number(8.0));
        assert_eq!(evaluate("=B1+A1", &lookup).to_string(), "8");
    }

    #[test]
    fn test_dependencies_match_evaluated_references() {
        let raw = "=SUM(A1:A3)+B2";
        for dep in extract_dependencies(raw) {
            match dep {
                Dependency::Range(range) => assert_eq!(range.to_string(), "A1:A3"),
                Dependency::Cell(cell) => assert_eq!(cell.to_string(), "B2"),
            }
        }
        assert!(references(raw, &CellRef::new(2, 0)));
    }

    #[test]
    fn test_codec_and_wire_ids_agree() {
        let cell = CellRef::parse_a1("C7").unwrap();
        assert_eq!(cell.to_cell_id(), "6-2");
        assert_eq!(CellRef::from_cell_id("6-2").unwrap().to_string(), "C7");
        assert_eq!(to_reference(6, 2).unwrap(), "C7");
    }
}
