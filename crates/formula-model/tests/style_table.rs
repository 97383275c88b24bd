use formula_model::{Border, BorderEdge, BorderStyle, Color, Font, Style, StyleTable};

#[test]
fn style_table_intern_deduplicates() {
    let mut table = StyleTable::new();

    let style = Style {
        font: Some(Font {
            bold: true,
            strike: true,
            color: Some(Color::new_argb(0xFFFF0000)),
            ..Default::default()
        }),
        number_format: Some("0%".to_string()),
        ..Default::default()
    };

    let a = table.intern(style.clone());
    let b = table.intern(style);
    assert_eq!(a, b, "identical styles should reuse the same id");
    assert_eq!(table.intern(Style::default()), 0, "style 0 is the default");
}

#[test]
fn style_table_deserialize_rebuilds_index() {
    let mut table = StyleTable::new();
    let thin = Style {
        border: Some(Border {
            bottom: BorderEdge {
                style: BorderStyle::Thin,
                color: Some(Color::black()),
            },
            ..Border::default()
        }),
        ..Style::default()
    };
    let id = table.intern(thin.clone());

    let json = serde_json::to_string(&table).unwrap();
    let mut restored: StyleTable = serde_json::from_str(&json).unwrap();
    assert_eq!(restored.intern(thin), id);
    assert_eq!(restored.len(), 2);
}
