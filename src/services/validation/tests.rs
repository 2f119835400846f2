//! Validation engine unit tests

use std::collections::BTreeMap;

use super::ast::{
    collect_select_facts, extract_used_columns, extract_used_tables, is_single_row_aggregate,
    parse_statement, top_query_mut,
};
use super::engine::{
    check_basic_sql_validity, deterministic_selection, filter_candidates,
    validate_and_select_best, validate_must_constraints,
};
use super::normalize::{
    check_join_presence, check_predicate_presence, decompose_predicate_to_atoms,
    normalize_join_condition, normalize_predicate,
};
use super::repair::{inject_missing_predicates, minimal_repair};
use crate::models::{SafetyContract, SqlCandidate};

const WEAK_PASSWORD_SQL: &str = "SELECT wpa.name, wpa.app_id, wpad.level \
     FROM weak_password_app wpa \
     JOIN weak_password_app_detail wpad ON wpad.app_id = wpa.app_id \
     WHERE wpad.pass_wd IS NOT NULL \
     LIMIT 200";

fn weak_password_contract() -> SafetyContract {
    let mut allowed_columns = BTreeMap::new();
    allowed_columns.insert(
        "weak_password_app".to_string(),
        vec!["name".to_string(), "app_id".to_string()],
    );
    allowed_columns.insert(
        "weak_password_app_detail".to_string(),
        vec![
            "level".to_string(),
            "pass_wd".to_string(),
            "app_id".to_string(),
            "last_find_time".to_string(),
        ],
    );
    SafetyContract {
        allowed_tables: vec![
            "weak_password_app".to_string(),
            "weak_password_app_detail".to_string(),
        ],
        allowed_columns,
        must_tables: vec![
            "weak_password_app".to_string(),
            "weak_password_app_detail".to_string(),
        ],
        must_joins: vec!["weak_password_app_detail.app_id = weak_password_app.app_id".to_string()],
        must_predicates: vec!["weak_password_app_detail.pass_wd IS NOT NULL".to_string()],
        ..Default::default()
    }
}

fn candidate(label: &str, sql: &str) -> SqlCandidate {
    SqlCandidate {
        label: label.to_string(),
        sql: sql.to_string(),
        checks: Vec::new(),
        confidence: 0.8,
        repaired: false,
    }
}

mod normalize_tests {
    use super::*;

    #[test]
    fn test_normalize_strips_prefixes_and_case() {
        assert_eq!(
            normalize_predicate("Weak_Password_App_Detail.Pass_Wd  IS   NOT NULL"),
            "pass_wd is not null"
        );
    }

    #[test]
    fn test_normalize_folds_not_is_null() {
        assert_eq!(normalize_predicate("NOT pass_wd IS NULL"), "pass_wd is not null");
        assert_eq!(normalize_predicate("NOT pass_wd IS NOT NULL"), "pass_wd is null");
    }

    #[test]
    fn test_normalize_join_collapses_equality_spacing() {
        assert_eq!(
            normalize_join_condition("wpad.app_id   =   wpa.app_id"),
            "app_id=app_id"
        );
    }

    #[test]
    fn test_decompose_simple_conjunction() {
        let atoms = decompose_predicate_to_atoms("a.x IS NOT NULL AND b.y = 1");
        assert_eq!(atoms, vec!["a.x IS NOT NULL", "b.y = 1"]);
    }

    #[test]
    fn test_decompose_unwraps_parenthesized_conjunction() {
        let atoms = decompose_predicate_to_atoms("(a.x IS NOT NULL AND b.y = 1)");
        assert_eq!(atoms, vec!["a.x IS NOT NULL", "b.y = 1"]);
    }

    #[test]
    fn test_decompose_keeps_nested_parens_whole() {
        let atoms = decompose_predicate_to_atoms("(a = 1 OR b = 2) AND c = 3");
        assert_eq!(atoms, vec!["a = 1 OR b = 2", "c = 3"]);
    }

    #[test]
    fn test_decompose_ignores_and_inside_literals() {
        let atoms = decompose_predicate_to_atoms("name = 'salt and pepper' AND x = 1");
        assert_eq!(atoms, vec!["name = 'salt and pepper'", "x = 1"]);
    }

    #[test]
    fn test_decompose_empty() {
        assert!(decompose_predicate_to_atoms("").is_empty());
        assert!(decompose_predicate_to_atoms("   ").is_empty());
    }

    #[test]
    fn test_predicate_presence_requires_all_atoms() {
        let wheres = vec!["wpad.pass_wd is not null".to_string()];
        assert!(check_predicate_presence(&wheres, "weak_password_app_detail.pass_wd IS NOT NULL"));
        assert!(!check_predicate_presence(
            &wheres,
            "weak_password_app_detail.pass_wd IS NOT NULL AND wpad.level = 1"
        ));
    }

    #[test]
    fn test_join_presence_is_prefix_insensitive() {
        let joins = vec!["wpad.app_id = wpa.app_id".to_string()];
        assert!(check_join_presence(
            &joins,
            "weak_password_app_detail.app_id = weak_password_app.app_id"
        ));
        assert!(!check_join_presence(&joins, "t.node_id = u.node_id"));
    }
}

mod ast_tests {
    use super::*;

    #[test]
    fn test_extract_tables_strips_aliases() {
        let statement = parse_statement(WEAK_PASSWORD_SQL).unwrap();
        let tables = extract_used_tables(&statement);
        assert!(tables.contains("weak_password_app"));
        assert!(tables.contains("weak_password_app_detail"));
        assert!(!tables.contains("wpa"));
    }

    #[test]
    fn test_extract_columns_strips_qualifiers() {
        let statement = parse_statement(WEAK_PASSWORD_SQL).unwrap();
        let columns = extract_used_columns(&statement);
        assert!(columns.contains("name"));
        assert!(columns.contains("pass_wd"));
        assert!(columns.contains("app_id"));
        assert!(!columns.iter().any(|c| c.contains('.')));
    }

    #[test]
    fn test_collect_join_and_where_conditions() {
        let statement = parse_statement(WEAK_PASSWORD_SQL).unwrap();
        let facts = collect_select_facts(&statement);
        assert_eq!(facts.join_conditions.len(), 1);
        assert!(facts.join_conditions[0].contains("wpad.app_id = wpa.app_id"));
        assert_eq!(facts.where_conditions.len(), 1);
        assert!(facts.where_conditions[0].contains("pass_wd is not null"));
    }

    #[test]
    fn test_collect_select_aliases() {
        let statement =
            parse_statement("SELECT COUNT(*) AS cnt, node_id AS n FROM virus_details GROUP BY node_id")
                .unwrap();
        let facts = collect_select_facts(&statement);
        assert!(facts.select_aliases.contains("cnt"));
        assert!(facts.select_aliases.contains("n"));
    }

    #[test]
    fn test_single_row_aggregate_detection() {
        let mut agg = parse_statement("SELECT COUNT(*) AS cnt FROM virus_details").unwrap();
        assert!(is_single_row_aggregate(top_query_mut(&mut agg).unwrap()));

        let mut grouped =
            parse_statement("SELECT node_id, COUNT(*) FROM virus_details GROUP BY node_id")
                .unwrap();
        assert!(!is_single_row_aggregate(top_query_mut(&mut grouped).unwrap()));

        let mut plain = parse_statement("SELECT node_id FROM virus_details").unwrap();
        assert!(!is_single_row_aggregate(top_query_mut(&mut plain).unwrap()));
    }

    #[test]
    fn test_parse_rejects_multiple_statements() {
        assert!(parse_statement("SELECT 1; SELECT 2").is_err());
    }
}

mod engine_tests {
    use super::*;

    #[test]
    fn test_basic_validity_rejects_select_star() {
        let outcome = check_basic_sql_validity("SELECT * FROM weak_password_app");
        assert!(!outcome.passed);
    }

    #[test]
    fn test_basic_validity_rejects_cjk_and_placeholder() {
        assert!(!check_basic_sql_validity("SELECT 名称 FROM t").passed);
        assert!(
            !check_basic_sql_validity("SELECT a FROM t WHERE b = specific_value_here").passed
        );
    }

    #[test]
    fn test_unparseable_sql_fails_closed() {
        let contract = weak_password_contract();
        let outcome = validate_must_constraints("SELEKT nothing FROM", &contract);
        assert!(!outcome.passed);
    }

    #[test]
    fn test_valid_candidate_passes_all_musts() {
        let contract = weak_password_contract();
        let outcome = validate_must_constraints(WEAK_PASSWORD_SQL, &contract);
        assert!(outcome.passed, "errors: {:?}", outcome.errors);
    }

    #[test]
    fn test_missing_must_table_detected() {
        let contract = weak_password_contract();
        let sql = "SELECT wpad.level FROM weak_password_app_detail wpad \
                   WHERE wpad.pass_wd IS NOT NULL";
        let outcome = validate_must_constraints(sql, &contract);
        assert!(!outcome.passed);
        assert!(outcome.errors.iter().any(|e| e.contains("required table")));
    }

    #[test]
    fn test_missing_must_join_detected() {
        let contract = weak_password_contract();
        let sql = "SELECT wpa.name, wpad.level \
                   FROM weak_password_app wpa, weak_password_app_detail wpad \
                   WHERE wpad.pass_wd IS NOT NULL";
        let outcome = validate_must_constraints(sql, &contract);
        assert!(!outcome.passed);
        assert!(outcome.errors.iter().any(|e| e.contains("required join")));
    }

    #[test]
    fn test_unauthorized_table_detected() {
        let contract = weak_password_contract();
        let sql = "SELECT wpa.name FROM weak_password_app wpa \
                   JOIN secret_table s ON s.app_id = wpa.app_id \
                   JOIN weak_password_app_detail wpad ON wpad.app_id = wpa.app_id \
                   WHERE wpad.pass_wd IS NOT NULL";
        let outcome = validate_must_constraints(sql, &contract);
        assert!(!outcome.passed);
        assert!(outcome.errors.iter().any(|e| e.contains("unauthorized table")));
    }

    #[test]
    fn test_unauthorized_column_detected() {
        let contract = weak_password_contract();
        let sql = "SELECT wpa.name, wpa.secret_flag \
                   FROM weak_password_app wpa \
                   JOIN weak_password_app_detail wpad ON wpad.app_id = wpa.app_id \
                   WHERE wpad.pass_wd IS NOT NULL";
        let outcome = validate_must_constraints(sql, &contract);
        assert!(!outcome.passed);
        assert!(outcome.errors.iter().any(|e| e.contains("unauthorized column")));
    }

    #[test]
    fn test_must_tables_inferred_from_joins_when_absent() {
        let mut contract = weak_password_contract();
        contract.must_tables.clear();
        let sql = "SELECT wpad.level FROM weak_password_app_detail wpad \
                   WHERE wpad.pass_wd IS NOT NULL";
        let outcome = validate_must_constraints(sql, &contract);
        // The join names both tables; the candidate only uses one.
        assert!(!outcome.passed);
        assert!(outcome.errors.iter().any(|e| e.contains("required table")));
    }

    #[test]
    fn test_deterministic_selection_key() {
        let long_unrepaired = candidate("a", "SELECT name, app_id FROM weak_password_app LIMIT 200");
        let short_unrepaired = candidate("b", "SELECT name FROM weak_password_app LIMIT 200");
        let mut repaired = candidate("c", "SELECT x FROM weak_password_app");
        repaired.repaired = true;

        let picked = deterministic_selection(vec![
            (0, repaired.clone()),
            (1, long_unrepaired.clone()),
            (2, short_unrepaired.clone()),
        ])
        .unwrap();
        assert_eq!(picked.label, "b");

        // Equal inputs resolve by original index.
        let picked = deterministic_selection(vec![
            (1, short_unrepaired.clone()),
            (0, short_unrepaired.clone()),
        ])
        .unwrap();
        assert_eq!(picked.label, "b");
    }

    #[test]
    fn test_selection_is_reproducible() {
        let contract = weak_password_contract();
        let candidates = vec![
            candidate("first", WEAK_PASSWORD_SQL),
            candidate(
                "second",
                "SELECT wpa.name FROM weak_password_app wpa \
                 JOIN weak_password_app_detail wpad ON wpad.app_id = wpa.app_id \
                 WHERE wpad.pass_wd IS NOT NULL",
            ),
        ];
        let a = validate_and_select_best(&candidates, &contract).unwrap();
        let b = validate_and_select_best(&candidates, &contract).unwrap();
        assert_eq!(a.label, b.label);
        assert_eq!(a.sql, b.sql);
        // Shorter passing SQL wins.
        assert_eq!(a.label, "second");
    }

    #[test]
    fn test_all_rejected_yields_none() {
        let contract = weak_password_contract();
        let candidates = vec![candidate("bad", "SELECT * FROM weak_password_app")];
        assert!(validate_and_select_best(&candidates, &contract).is_none());
    }
}

mod repair_tests {
    use super::*;

    #[test]
    fn test_repair_injects_missing_atom_of_conjunction() {
        let mut contract = weak_password_contract();
        contract.must_predicates = vec![
            "weak_password_app_detail.pass_wd IS NOT NULL AND weak_password_app_detail.level = 1"
                .to_string(),
        ];

        // Only the first atom is present.
        let repaired = minimal_repair(WEAK_PASSWORD_SQL, &contract).unwrap();
        assert!(repaired.to_lowercase().contains("level = 1"));

        let outcome = validate_must_constraints(&repaired, &contract);
        assert!(outcome.passed, "errors: {:?}", outcome.errors);
    }

    #[test]
    fn test_repair_noop_when_all_atoms_present() {
        let contract = weak_password_contract();
        assert!(minimal_repair(WEAK_PASSWORD_SQL, &contract).is_none());
    }

    #[test]
    fn test_repair_noop_without_must_predicates() {
        let mut contract = weak_password_contract();
        contract.must_predicates.clear();
        assert!(minimal_repair("SELECT name FROM weak_password_app", &contract).is_none());
    }

    #[test]
    fn test_inject_without_where_lands_before_limit() {
        let sql = "SELECT wpa.name FROM weak_password_app wpa LIMIT 10";
        let injected =
            inject_missing_predicates(sql, &["wpa.app_id IS NOT NULL".to_string()]);
        let lower = injected.to_lowercase();
        let where_pos = lower.find("where").expect("WHERE inserted");
        let limit_pos = lower.find("limit").unwrap();
        assert!(where_pos < limit_pos);
    }

    #[test]
    fn test_inject_preserves_or_precedence() {
        let sql = "SELECT name FROM weak_password_app WHERE a = 1 OR b = 2";
        let injected = inject_missing_predicates(sql, &["c = 3".to_string()]);
        let lower = injected.to_lowercase();
        // Existing OR must be fenced before the new conjunct.
        assert!(lower.contains("(a = 1 or b = 2) and c = 3"));
    }

    #[test]
    fn test_filter_candidates_marks_repaired_and_loses_tiebreak() {
        let mut contract = weak_password_contract();
        contract.must_predicates = vec![
            "weak_password_app_detail.pass_wd IS NOT NULL AND weak_password_app_detail.level = 1"
                .to_string(),
        ];

        let complete = "SELECT wpa.name, wpa.app_id, wpad.level \
             FROM weak_password_app wpa \
             JOIN weak_password_app_detail wpad ON wpad.app_id = wpa.app_id \
             WHERE wpad.pass_wd IS NOT NULL AND wpad.level = 1 \
             LIMIT 200";
        let candidates = vec![candidate("incomplete", WEAK_PASSWORD_SQL), candidate("complete", complete)];

        let valid = filter_candidates(&candidates, &contract);
        assert_eq!(valid.len(), 2);
        assert!(valid[0].1.repaired);
        assert!(!valid[1].1.repaired);

        // The repaired candidate is shorter but loses the tie-break.
        let best = deterministic_selection(valid).unwrap();
        assert_eq!(best.label, "complete");
    }
}
