// src/config.rs
//
// Test plan model, loading and validation.

use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::distribution::Distribution;

// Base-1024 multipliers for the object size unit.
const KILOBYTE: u64 = 1 << 10;
const MEGABYTE: u64 = 1 << 20;
const GIGABYTE: u64 = 1 << 30;
const TERABYTE: u64 = 1 << 40;

/// A wall-clock duration that deserializes from integer nanoseconds, float
/// nanoseconds or a humantime string ("36000s", "5m"), and serializes to a
/// humantime string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Duration(pub std::time::Duration);

impl Duration {
    pub const fn from_secs(secs: u64) -> Self {
        Duration(std::time::Duration::from_secs(secs))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn as_std(&self) -> std::time::Duration {
        self.0
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        humantime::format_duration(self.0).fmt(f)
    }
}

impl Serialize for Duration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(self.0))
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DurationVisitor;

        impl Visitor<'_> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a duration string or a number of nanoseconds")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Duration, E> {
                Ok(Duration(std::time::Duration::from_nanos(value)))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Duration, E> {
                if value < 0 {
                    return Err(E::custom("duration cannot be negative"));
                }
                Ok(Duration(std::time::Duration::from_nanos(value as u64)))
            }

            fn visit_f64<E: de::Error>(self, value: f64) -> Result<Duration, E> {
                if value < 0.0 {
                    return Err(E::custom("duration cannot be negative"));
                }
                Ok(Duration(std::time::Duration::from_nanos(value as u64)))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Duration, E> {
                humantime::parse_duration(value)
                    .map(Duration)
                    .map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

/// Everything needed to reach one S3 endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct S3Configuration {
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub timeout: Duration,
    #[serde(default, rename = "skipSSLverify")]
    pub skip_ssl_verify: bool,
    #[serde(default, rename = "usePathStyle")]
    pub use_path_style: bool,
}

/// Credentials for posting test annotations to a Grafana instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrafanaConfiguration {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub endpoint: String,
}

/// Object population of a test case. Size fields are declared in `unit` and
/// scaled to bytes during validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Objects {
    #[serde(default)]
    pub size_min: u64,
    #[serde(default)]
    pub size_max: u64,
    #[serde(default)]
    pub part_size: u64,
    pub size_distribution: Distribution,
    #[serde(default)]
    pub number_min: u64,
    #[serde(default)]
    pub number_max: u64,
    pub number_distribution: Distribution,
    #[serde(default)]
    pub unit: String,
}

/// Bucket population of a test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Buckets {
    #[serde(default)]
    pub number_min: u64,
    #[serde(default)]
    pub number_max: u64,
    pub number_distribution: Distribution,
}

/// One performance test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseConfiguration {
    #[serde(default)]
    pub name: String,
    pub objects: Objects,
    pub buckets: Buckets,
    #[serde(default)]
    pub bucket_prefix: String,
    #[serde(default)]
    pub object_prefix: String,
    /// Run for this long. Wins over `stop_with_ops` when both are set.
    #[serde(default, rename = "stop_with_runtime")]
    pub runtime: Duration,
    /// Stop after dispatching this many operations.
    #[serde(default, rename = "stop_with_ops")]
    pub ops_deadline: u64,
    /// Number of worker processes to recruit for this test.
    #[serde(default)]
    pub workers: usize,
    /// When true, bucket names omit the per-worker prefix so all workers
    /// operate on the same buckets.
    #[serde(default)]
    pub workers_share_buckets: bool,
    /// Parallel clients within each worker process.
    #[serde(default)]
    pub parallel_clients: usize,
    #[serde(default)]
    pub clean_after: bool,
    #[serde(default)]
    pub read_weight: u64,
    #[serde(default)]
    pub existing_read_weight: u64,
    #[serde(default)]
    pub write_weight: u64,
    #[serde(default)]
    pub list_weight: u64,
    #[serde(default)]
    pub delete_weight: u64,
    /// How long the coordinator waits on the preparation and result barriers
    /// before continuing with the workers that responded. Defaults to the
    /// test runtime plus 30 seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barrier_timeout: Option<Duration>,
}

/// A full test plan: endpoints, optional Grafana annotation target and the
/// ordered list of tests to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Testconf {
    pub s3_config: Vec<S3Configuration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grafana_config: Option<GrafanaConfiguration>,
    pub tests: Vec<TestCaseConfiguration>,
}

/// The slice of the plan sent to a single worker during `init`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConf {
    pub s3_config: S3Configuration,
    pub test: TestCaseConfiguration,
    pub worker_id: String,
}

/// Reads a test plan from disk, choosing YAML or JSON by file extension.
pub fn load_config_from_file(path: &Path) -> Result<Testconf> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("error reading config file {}", path.display()))?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match extension.as_str() {
        "yaml" | "yml" => {
            serde_yaml::from_str(&content).context("error unmarshaling yaml config file")
        }
        "json" => serde_json::from_str(&content).context("error unmarshaling json config file"),
        _ => bail!("Configuration file must be a yaml or json formatted file"),
    }
}

/// Checks the whole plan and scales all object size fields to bytes.
pub fn check_config(config: &mut Testconf) -> Result<()> {
    if config.s3_config.is_empty() {
        bail!("Please configure at least one s3_config endpoint");
    }
    if config.tests.is_empty() {
        bail!("Please configure at least one test");
    }
    for testcase in &mut config.tests {
        check_test_case(testcase)
            .with_context(|| format!("issue detected when scanning test case {:?}", testcase.name))?;
    }
    Ok(())
}

fn check_test_case(testcase: &mut TestCaseConfiguration) -> Result<()> {
    if testcase.runtime.is_zero() && testcase.ops_deadline == 0 {
        bail!("Either stop_with_runtime or stop_with_ops needs to be set");
    }
    if testcase.read_weight == 0
        && testcase.write_weight == 0
        && testcase.list_weight == 0
        && testcase.delete_weight == 0
        && testcase.existing_read_weight == 0
    {
        bail!("At least one weight needs to be set - Read / Write / List / Delete");
    }
    if testcase.existing_read_weight != 0 && testcase.bucket_prefix.is_empty() {
        bail!("When using existing_read_weight, setting the bucket_prefix is mandatory");
    }
    if testcase.buckets.number_min == 0 {
        bail!("Please set minimum number of Buckets");
    }
    if testcase.objects.size_min == 0 {
        bail!("Please set minimum size of Objects");
    }
    if testcase.objects.size_max == 0 {
        bail!("Please set maximum size of Objects");
    }
    if testcase.objects.number_min == 0 {
        bail!("Please set minimum number of Objects");
    }

    let to_byte_multiplicator = match testcase.objects.unit.to_uppercase().as_str() {
        "B" => 1,
        "KB" | "K" => KILOBYTE,
        "MB" | "M" => MEGABYTE,
        "GB" | "G" => GIGABYTE,
        "TB" | "T" => TERABYTE,
        _ => bail!("Could not parse unit size - please use one of B/KB/MB/GB/TB"),
    };

    testcase.objects.size_min *= to_byte_multiplicator;
    testcase.objects.size_max *= to_byte_multiplicator;
    testcase.objects.part_size *= to_byte_multiplicator;
    Ok(())
}
