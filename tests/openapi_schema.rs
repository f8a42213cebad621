use serde_json::Value;

#[test]
fn openapi_describes_review_fields() -> anyhow::Result<()> {
    // Build the OpenAPI document the same way the server does
    let doc = mukhattat::docs::build_openapi()?;
    let v = serde_json::to_value(&doc)?;

    let schemas = v
        .get("components")
        .and_then(|c| c.get("schemas"))
        .and_then(Value::as_object)
        .expect("components.schemas must exist");

    for name in [
        "Document",
        "DocumentVersion",
        "Blueprint",
        "PermissionsOverview",
        "DocumentPage",
        "TimeEntry",
        "DashboardSummary",
    ] {
        assert!(schemas.contains_key(name), "OpenAPI missing schema '{name}'");
    }

    let paths = v.get("paths").and_then(Value::as_object).expect("paths must exist");
    assert!(paths["/documents/{id}/versions"].get("post").is_some());
    assert!(paths["/projects/{id}/blueprint"].get("post").is_some());
    assert!(paths["/reports/dashboard-summary"].get("get").is_some());
    Ok(())
}
