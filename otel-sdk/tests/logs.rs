use std::time::Duration;

use otel_core::{KeyValue, Value};
use otel_sdk::logs::{
    BatchConfigBuilder, BatchLogProcessor, InMemoryLogExporter, InMemoryLogExporterBuilder,
    SdkLoggerProvider, Severity,
};
use otel_sdk::Resource;

fn emit_checkouts(provider: &SdkLoggerProvider, count: usize) {
    let logger = provider.logger("checkout");
    for i in 0..count {
        let mut record = logger.create_log_record();
        record.set_severity(Severity::Warn);
        record.set_body("Unable to process checkout.");
        record.add_attribute("order", i as i64);
        logger.emit(record);
    }
}

#[test]
fn batch_processor_exports_on_flush() {
    let exporter = InMemoryLogExporter::default();
    let processor = BatchLogProcessor::builder(exporter.clone())
        .with_batch_config(
            BatchConfigBuilder::new()
                .with_scheduled_delay(Duration::from_secs(3600))
                .with_max_export_batch_size(4)
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();
    let provider = SdkLoggerProvider::builder()
        .with_resource(
            Resource::builder()
                .with_attribute(KeyValue::new("service.name", "shop"))
                .build(),
        )
        .with_log_processor(processor)
        .build();

    emit_checkouts(&provider, 10);
    provider.force_flush().unwrap();

    let logs = exporter.get_emitted_logs().unwrap();
    assert_eq!(logs.len(), 10);

    let mut orders: Vec<i64> = logs
        .iter()
        .filter_map(|log| match log.record.attribute("order") {
            Some(Value::I64(order)) => Some(*order),
            _ => None,
        })
        .collect();
    orders.sort_unstable();
    assert_eq!(orders, (0..10).collect::<Vec<i64>>());

    let first = &logs[0];
    assert_eq!(first.instrumentation.name(), "checkout");
    assert_eq!(first.record.severity_number, Some(Severity::Warn));
    assert_eq!(first.record.severity_text.as_deref(), Some("WARN"));
    assert!(first.record.observed_timestamp.is_some());
    assert_eq!(first.resource.len(), 1);

    provider.shutdown().unwrap();
}

#[test]
fn shutdown_drains_queue_and_rejects_second_call() {
    let exporter = InMemoryLogExporterBuilder::new()
        .keep_records_on_shutdown()
        .build();
    let provider = SdkLoggerProvider::builder()
        .with_batch_exporter(exporter.clone())
        .build();

    emit_checkouts(&provider, 3);
    provider.shutdown().unwrap();

    assert_eq!(exporter.get_emitted_logs().unwrap().len(), 3);
    assert!(provider.shutdown().is_err());
}

#[test]
fn simple_processor_exports_inline() {
    let exporter = InMemoryLogExporter::default();
    let provider = SdkLoggerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();

    emit_checkouts(&provider, 2);

    assert_eq!(exporter.get_emitted_logs().unwrap().len(), 2);
}
