//! Influx backend tests
//!
//! These run the backend against a mock HTTP server and assert on the
//! line protocol bodies, Flux queries, and error mapping.

use chrono::{NaiveDate, NaiveDateTime};
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fitbit_ingest::devices::DeviceInfo;
use fitbit_ingest::error::IngestError;
use fitbit_ingest::models::{Destination, FlatRecord, MetricKind, MetricValues};
use fitbit_ingest::storage::{write_grouped, InfluxStore, MetricStore};

fn test_store(server: &MockServer) -> InfluxStore {
    InfluxStore::new(&server.uri(), "test-token", "test-org", "metrics")
}

fn ts(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

fn spo2_record(hour: u32, value: f64) -> FlatRecord {
    FlatRecord {
        user_id: "1".to_string(),
        device_id: "1".to_string(),
        timestamp: ts(5, hour),
        values: MetricValues::Spo2 { value },
    }
}

fn hr_record(hour: u32) -> FlatRecord {
    FlatRecord {
        user_id: "1".to_string(),
        device_id: "1".to_string(),
        timestamp: ts(5, hour),
        values: MetricValues::HeartRate {
            value: Some(60),
            resting_heart_rate: Some(58),
        },
    }
}

#[tokio::test]
async fn test_upsert_group_writes_line_protocol() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .and(query_param("org", "test-org"))
        .and(query_param("bucket", "metrics"))
        .and(query_param("precision", "ns"))
        .and(header("Authorization", "Token test-token"))
        .and(body_string_contains(
            "spo2,user_id=1,device_id=1 value=95.5 1704412800000000000",
        ))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let store = test_store(&server);
    let written = store
        .upsert_group(Destination::Spo2, &[spo2_record(0, 95.5)])
        .await
        .unwrap();
    assert_eq!(written, 1);
}

#[tokio::test]
async fn test_unauthorized_write_maps_to_storage_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let store = test_store(&server);
    let err = store
        .upsert_group(Destination::Spo2, &[spo2_record(0, 95.5)])
        .await
        .unwrap_err();

    match err {
        IngestError::Storage { status, .. } => assert_eq!(status, 401),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_ensure_user_and_device_makes_no_requests() {
    let server = MockServer::start().await;
    let store = test_store(&server);

    store
        .ensure_user_and_device(
            "1",
            "1",
            &DeviceInfo {
                device_type: "fitbit".to_string(),
                model: "charge6".to_string(),
            },
        )
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert!(requests.is_empty());
}

#[tokio::test]
async fn test_read_watermark_parses_flux_csv() {
    let server = MockServer::start().await;
    let csv = "#group,false,false,true,true,false,false,true,true,true,true\r\n\
               #datatype,string,long,dateTime:RFC3339,dateTime:RFC3339,dateTime:RFC3339,double,string,string,string,string\r\n\
               #default,_result,,,,,,,,,\r\n\
               ,result,table,_start,_stop,_time,_value,_field,_measurement,metric_type,user_id\r\n\
               ,_result,0,2023-01-05T00:00:00Z,2024-01-05T12:00:00Z,2024-01-05T09:00:00Z,1704412800,last_processed_date,last_processed_dates,heart_rate,1\r\n";

    Mock::given(method("POST"))
        .and(path("/api/v2/query"))
        .and(query_param("org", "test-org"))
        .and(header("Authorization", "Token test-token"))
        .and(body_string_contains("last_processed_dates"))
        .and(body_string_contains(r#"r.metric_type == "heart_rate""#))
        .and(body_string_contains(r#"r.user_id == "1""#))
        .respond_with(ResponseTemplate::new(200).set_body_string(csv))
        .expect(1)
        .mount(&server)
        .await;

    let store = test_store(&server);
    let watermark = store
        .read_watermark(MetricKind::HeartRate, "1")
        .await
        .unwrap();
    assert_eq!(watermark, Some(ts(5, 0)));
}

#[tokio::test]
async fn test_read_watermark_empty_result_is_none() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/query"))
        .respond_with(ResponseTemplate::new(200).set_body_string("\r\n"))
        .mount(&server)
        .await;

    let store = test_store(&server);
    let watermark = store.read_watermark(MetricKind::Spo2, "1").await.unwrap();
    assert_eq!(watermark, None);
}

#[tokio::test]
async fn test_write_watermark_records_epoch_seconds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .and(body_string_contains(
            "last_processed_dates,metric_type=spo2,user_id=1 last_processed_date=1704412800",
        ))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let store = test_store(&server);
    store
        .write_watermark(MetricKind::Spo2, "1", ts(5, 0))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_seed_watermarks_is_a_single_write() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .and(body_string_contains("metric_type=heart_rate"))
        .and(body_string_contains("metric_type=spo2"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let store = test_store(&server);
    store
        .seed_watermarks(
            &[
                (MetricKind::HeartRate, "1".to_string()),
                (MetricKind::Spo2, "1".to_string()),
            ],
            ts(1, 0),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_write_grouped_isolates_failed_measurement() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .and(body_string_contains("heart_rate,"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/write"))
        .and(body_string_contains("spo2,"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let store = test_store(&server);
    let report = write_grouped(
        &store,
        vec![hr_record(8), spo2_record(0, 95.5), spo2_record(1, 96.0)],
    )
    .await;

    assert_eq!(report.written, 2);
    assert_eq!(report.failed_groups.len(), 1);
    assert_eq!(report.failed_groups[0].0, Destination::HeartRate);
}

#[tokio::test]
async fn test_clear_metrics_deletes_each_measurement() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v2/delete"))
        .and(query_param("org", "test-org"))
        .and(query_param("bucket", "metrics"))
        .respond_with(ResponseTemplate::new(204))
        .expect(7)
        .mount(&server)
        .await;

    let store = test_store(&server);
    store.clear_metrics().await.unwrap();
}
