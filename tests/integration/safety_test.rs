//! SQL validator scenarios with statements shaped like generated queries.

use landos::safety::{validate, KNOWN_TABLES};

#[test]
fn test_generated_spatial_join_is_accepted() {
    let sql = "SELECT s.address, s.sale_price, ST_AsGeoJSON(s.geom) AS geometry \
               FROM sold_properties s \
               JOIN rzlt r ON s.geom && r.geom AND ST_Intersects(s.geom, r.geom) \
               WHERE s.sale_date > '2023-01-01' \
               LIMIT 25";

    let vetted = validate(sql).unwrap();
    assert!(vetted.is_clean());
}

#[test]
fn test_lowercase_and_schema_qualified_tables() {
    let vetted = validate(
        "select plan_ref, decision from public.dlr_planning_points \
         join public.cadastral_freehold c on ST_DWithin(c.geom::geography, geom::geography, 200)",
    )
    .unwrap();
    assert!(vetted.is_clean());
}

#[test]
fn test_unknown_table_is_advisory() {
    let vetted = validate("SELECT * FROM planning_history JOIN sold_properties USING (id)").unwrap();
    assert_eq!(vetted.unrecognized_tables, vec!["planning_history".to_string()]);
    assert!(!KNOWN_TABLES.contains(&"planning_history"));
}

#[test]
fn test_destructive_statements_are_rejected() {
    let cases = [
        ("DELETE FROM rzlt", "DELETE"),
        ("select 1; drop table rzlt", "DROP"),
        ("UPDATE sold_properties SET sale_price = 0", "UPDATE"),
        ("COPY rzlt TO '/tmp/out.csv'", "COPY"),
        ("DO $$ BEGIN PERFORM 1; END $$", "DO"),
        ("GRANT SELECT ON rzlt TO public", "GRANT"),
    ];

    for (sql, keyword) in cases {
        let rejection = validate(sql).unwrap_err();
        assert_eq!(
            rejection.reason(),
            format!("blocked keyword: {keyword}"),
            "statement: {sql}"
        );
    }
}

#[test]
fn test_keywords_inside_identifiers_are_allowed() {
    // created_at, updated and dropoff contain blocked words but not as whole words.
    let vetted = validate(
        "SELECT created_at, updated, dropoff, descrptn FROM dlr_planning_polygons LIMIT 25",
    );
    assert!(vetted.is_ok());
}
