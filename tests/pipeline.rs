//! End-to-end: row source → execute → chart → export, read back with the
//! same crates the exports are meant for.

use std::io::Cursor;
use std::sync::Arc;

use calamine::{open_workbook_from_rs, Data, Reader, Xlsx};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;

use report_engine::config::{load_sources_from_dir, DefinitionStore};
use report_engine::model::{
    AggregateFunction, Aggregation, ChartConfig, Field, FieldType, FilterOperator, Filter, GroupBy,
    SortDirection, SortSpec,
};
use report_engine::schedule::{Frequency, ScheduleConfig, ScheduleRequest, ScheduledReport};
use report_engine::source::memory::MemorySource;
use report_engine::source::{DataSourceSpec, SourceCatalog};
use report_engine::{
    ExecutionOptions, ExportFormat, ExportOptions, ReportDefinition, ReportEngine, ReportError,
};

fn trips() -> Vec<serde_json::Value> {
    vec![
        json!({"driver": "Ana", "amount": 10, "status": "done", "date": "2024-03-01"}),
        json!({"driver": "Luis", "amount": "20", "status": "done", "date": "2024-03-02"}),
        json!({"driver": "Ana", "amount": 30, "status": "done", "date": "2024-03-03"}),
        json!({"driver": "Marta, Jr.", "amount": null, "status": "pending", "date": "2024-03-04"}),
    ]
}

fn engine() -> ReportEngine {
    let mut catalog = SourceCatalog::new();
    catalog
        .register(
            DataSourceSpec {
                key: "trips".into(),
                label: "Viajes".into(),
                fields: vec![
                    Field::new("driver", "Conductor", FieldType::Text),
                    Field::new("amount", "Monto", FieldType::Currency),
                    Field::new("status", "Estado", FieldType::Text),
                    Field::new("date", "Fecha", FieldType::Date),
                ],
            },
            Arc::new(MemorySource::new().with_rows("trips", trips())),
        )
        .unwrap();
    ReportEngine::new(catalog)
}

fn by_driver() -> ReportDefinition {
    ReportDefinition::new("by_driver", "Reporte Mensual #1", "trips")
        .with_group_by(GroupBy {
            field: "driver".into(),
            label: String::new(),
            date_format: None,
        })
        .with_aggregation(Aggregation {
            field: "amount".into(),
            function: AggregateFunction::Sum,
            label: String::new(),
        })
        .with_sort(SortSpec {
            field: "sum_amount".into(),
            direction: SortDirection::Desc,
        })
}

fn at_fixed_time() -> ExecutionOptions {
    ExecutionOptions {
        now: Some(Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_grouped_execution() {
    let data = engine().execute(&by_driver(), &ExecutionOptions::default()).await.unwrap();

    assert_eq!(data.headers, vec!["Conductor", "sum (Monto)"]);
    assert_eq!(data.columns, vec!["driver", "sum_amount"]);
    let names: Vec<String> = data.rows.iter().map(|r| r[0].display()).collect();
    assert_eq!(names, vec!["Ana", "Luis", "Marta, Jr."]);
    assert_eq!(data.rows[0][1].as_number(), Some(40.0));
    assert_eq!(data.rows[2][1].as_number(), Some(0.0));
    assert_eq!(data.total_rows, 3);
    assert_eq!(data.aggregates[0].value.as_number(), Some(60.0));
}

#[tokio::test]
async fn test_runtime_filters_narrow_result() {
    let options = ExecutionOptions {
        extra_filters: vec![Filter::scalar("only_done", "status", FilterOperator::Equals, json!("done"))],
        ..Default::default()
    };
    let data = engine().execute(&by_driver(), &options).await.unwrap();
    assert_eq!(data.rows.len(), 2);
    assert_eq!(data.metadata.filters.len(), 1);
}

#[tokio::test]
async fn test_invalid_definition_fails_before_fetch() {
    let definition = by_driver().with_filter(Filter::scalar("f", "ghost", FilterOperator::Equals, json!(1)));
    let err = engine().execute(&definition, &ExecutionOptions::default()).await.unwrap_err();
    assert!(matches!(err, ReportError::Definition(_)));
}

#[tokio::test]
async fn test_csv_export_reads_back() {
    let artifact = engine()
        .export(&by_driver(), &at_fixed_time(), &ExportOptions::new(ExportFormat::Csv))
        .await
        .unwrap();
    assert_eq!(artifact.mime_type, "text/csv; charset=utf-8");
    assert_eq!(artifact.filename, "reporte-mensual--1-2024-03-05-09-00-00.csv");

    let mut reader = csv::Reader::from_reader(artifact.bytes.as_slice());
    let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    assert_eq!(headers, vec!["Conductor", "sum (Monto)"]);
    let records: Vec<Vec<String>> = reader
        .records()
        .map(|r| r.unwrap().iter().map(String::from).collect())
        .collect();
    assert_eq!(records[0], vec!["Ana", "40"]);
    assert_eq!(records[2], vec!["Marta, Jr.", "0"]);
}

#[tokio::test]
async fn test_excel_export_reads_back() {
    let mut options = ExportOptions::new(ExportFormat::Excel);
    options.include_charts = true;
    let definition = by_driver().with_chart(
        serde_json::from_value::<ChartConfig>(json!({
            "type": "bar", "title": "Monto por conductor", "xAxis": "driver", "yAxis": ["amount"]
        }))
        .unwrap(),
    );

    let artifact = engine().export(&definition, &at_fixed_time(), &options).await.unwrap();
    assert_eq!(artifact.filename, "reporte-mensual--1-2024-03-05-09-00-00.xlsx");

    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(artifact.bytes)).unwrap();
    assert_eq!(workbook.sheet_names(), vec!["Data", "Información", "Gráficos"]);

    let data = workbook.worksheet_range("Data").unwrap();
    let rows: Vec<&[Data]> = data.rows().collect();
    assert_eq!(rows[0][0], Data::String("Conductor".into()));
    assert_eq!(rows[1][0], Data::String("Ana".into()));
    assert_eq!(rows[1][1], Data::Float(40.0));

    let info = workbook.worksheet_range("Información").unwrap();
    let info_rows: Vec<&[Data]> = info.rows().collect();
    assert_eq!(info_rows[0][0], Data::String("Título".into()));
    assert_eq!(info_rows[0][1], Data::String("Reporte Mensual #1".into()));
    assert_eq!(info_rows[4][0], Data::String("Total de filas".into()));
    assert_eq!(info_rows[4][1], Data::String("3".into()));
    assert_eq!(info_rows[6][0], Data::String("Filtros aplicados".into()));
    assert_eq!(info_rows[6][1], Data::String("0".into()));
    assert_eq!(info_rows[8][0], Data::String("Totales".into()));
    assert_eq!(info_rows[9][1], Data::Float(60.0));

    let charts = workbook.worksheet_range("Gráficos").unwrap();
    let chart_row: Vec<&[Data]> = charts.rows().collect();
    assert_eq!(chart_row[1][0], Data::String("Monto por conductor".into()));
    assert_eq!(chart_row[1][3], Data::String("amount".into()));
}

#[tokio::test]
async fn test_pdf_export_loads() {
    let mut options = ExportOptions::new(ExportFormat::Pdf);
    options.include_charts = true;
    let definition = by_driver()
        .with_chart(
            serde_json::from_value::<ChartConfig>(json!({
                "type": "pie", "title": "Participación", "xAxis": "driver", "yAxis": ["amount"]
            }))
            .unwrap(),
        )
        .with_chart(
            serde_json::from_value::<ChartConfig>(json!({
                "type": "funnel", "title": "Embudo", "xAxis": "driver", "yAxis": ["amount"]
            }))
            .unwrap(),
        );

    let artifact = engine().export(&definition, &at_fixed_time(), &options).await.unwrap();
    assert_eq!(artifact.mime_type, "application/pdf");
    assert_eq!(artifact.warnings.len(), 1);

    let doc = lopdf::Document::load_mem(&artifact.bytes).unwrap();
    assert_eq!(doc.get_pages().len(), 1);
}

#[tokio::test]
async fn test_chart_projection_through_engine() {
    let engine = engine();
    let definition = by_driver().with_chart(
        serde_json::from_value::<ChartConfig>(json!({
            "type": "line", "title": "Tendencia", "xAxis": "driver", "yAxis": ["sum_amount"]
        }))
        .unwrap(),
    );
    let data = engine.execute(&definition, &ExecutionOptions::default()).await.unwrap();

    let series = engine.chart(&data, &definition, 0).unwrap().unwrap();
    assert_eq!(series.records.len(), 3);
    assert_eq!(series.records[1]["sum (Monto)"], json!(20.0));
    assert!(engine.chart(&data, &definition, 1).is_none());
}

#[tokio::test]
async fn test_schedule_run_exports_and_advances() {
    let engine = engine();
    let created_at: DateTime<Utc> = Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap();
    let mut schedule = ScheduledReport::create(
        ScheduleRequest {
            name: "Lunes".into(),
            report_definition_id: "by_driver".into(),
            frequency: Frequency::Weekly,
            schedule_config: ScheduleConfig {
                time: "09:00".into(),
                day_of_week: Some(1),
                day_of_month: None,
                timezone: "UTC".into(),
            },
            recipients: vec!["ops@example.com".into()],
            export_formats: vec![ExportFormat::Csv, ExportFormat::Pdf],
            is_active: true,
        },
        created_at,
    )
    .unwrap();
    assert_eq!(schedule.next_run().to_rfc3339(), "2024-03-11T09:00:00+00:00");

    let fired_at = Utc.with_ymd_and_hms(2024, 3, 11, 9, 0, 5).unwrap();
    let artifacts = engine.run_schedule(&mut schedule, &by_driver(), fired_at).await.unwrap();

    let mimes: Vec<&str> = artifacts.iter().map(|a| a.mime_type.as_str()).collect();
    assert_eq!(mimes, vec!["text/csv; charset=utf-8", "application/pdf"]);
    assert_eq!(schedule.last_run(), Some(fired_at));
    assert_eq!(schedule.next_run().to_rfc3339(), "2024-03-18T09:00:00+00:00");
}

#[tokio::test]
async fn test_definitions_and_sources_from_disk() {
    let root = std::env::temp_dir().join(format!("report-engine-{}", uuid::Uuid::new_v4()));
    let sources = root.join("configs/sources");
    let reports = root.join("configs/reports");
    let data = root.join("data");
    for dir in [&sources, &reports, &data] {
        std::fs::create_dir_all(dir).unwrap();
    }

    std::fs::write(
        sources.join("sales.json"),
        json!({
            "key": "sales",
            "label": "Ventas",
            "fields": [
                {"key": "region", "label": "Región", "type": "text"},
                {"key": "total", "label": "Total", "type": "number"}
            ]
        })
        .to_string(),
    )
    .unwrap();
    std::fs::write(
        reports.join("by_region.json"),
        json!({
            "id": "by_region",
            "name": "Ventas por región",
            "dataSource": "sales",
            "groupBy": [{"field": "region"}],
            "aggregations": [{"field": "total", "function": "avg"}],
            "sorting": [{"field": "region"}]
        })
        .to_string(),
    )
    .unwrap();
    std::fs::write(data.join("sales.csv"), "region,total\nSur,10\nNorte,5\nSur,20\n").unwrap();

    let catalog = load_sources_from_dir(&sources, &data, None).unwrap();
    let store = DefinitionStore::load_from_dir(&reports, &catalog).unwrap();
    assert_eq!(store.list(), vec!["by_region"]);

    let engine = ReportEngine::new(catalog);
    let definition = store.get("by_region").unwrap();
    let result = engine.execute(&definition, &ExecutionOptions::default()).await.unwrap();

    let rows: Vec<(String, Option<f64>)> = result
        .rows
        .iter()
        .map(|r| (r[0].display(), r[1].as_number()))
        .collect();
    assert_eq!(rows, vec![("Norte".to_string(), Some(5.0)), ("Sur".to_string(), Some(15.0))]);

    std::fs::remove_dir_all(&root).ok();
}
