pub const CDC_RECORDS_RECEIVED: &str = "billing_cache_cdc_records_received";
pub const CDC_RECORDS_APPLIED: &str = "billing_cache_cdc_records_applied";
pub const CDC_DECODE_ERRORS: &str = "billing_cache_cdc_decode_errors";
pub const CDC_EMPTY_RECORDS: &str = "billing_cache_cdc_empty_records";
pub const CDC_FETCH_ERRORS: &str = "billing_cache_cdc_fetch_errors";
pub const CDC_WRITE_FAILURES: &str = "billing_cache_cdc_write_failures";
pub const SNAPSHOT_ROWS_FETCHED: &str = "billing_cache_snapshot_rows_fetched";
pub const SNAPSHOT_WRITE_FAILURES: &str = "billing_cache_snapshot_write_failures";
