// tests/config_tests.rs
//
// Test plan validation and loading.

use std::io::Write;

use gosbench::config::{
    check_config, load_config_from_file, Buckets, Duration, Objects, S3Configuration,
    TestCaseConfiguration, Testconf,
};
use gosbench::distribution::Distribution;

fn base_test_case() -> TestCaseConfiguration {
    TestCaseConfiguration {
        name: "unit".into(),
        objects: Objects {
            size_min: 1,
            size_max: 2,
            part_size: 0,
            size_distribution: Distribution::Constant,
            number_min: 1,
            number_max: 2,
            number_distribution: Distribution::Constant,
            unit: "KB".into(),
        },
        buckets: Buckets {
            number_min: 1,
            number_max: 1,
            number_distribution: Distribution::Constant,
        },
        bucket_prefix: "bench-".into(),
        object_prefix: "obj".into(),
        runtime: Duration::default(),
        ops_deadline: 10,
        workers: 1,
        workers_share_buckets: false,
        parallel_clients: 1,
        clean_after: false,
        read_weight: 1,
        existing_read_weight: 0,
        write_weight: 0,
        list_weight: 0,
        delete_weight: 0,
        barrier_timeout: None,
    }
}

fn plan_with(test: TestCaseConfiguration) -> Testconf {
    Testconf {
        s3_config: vec![S3Configuration::default()],
        grafana_config: None,
        tests: vec![test],
    }
}

#[test]
fn valid_plan_passes() {
    let mut config = plan_with(base_test_case());
    check_config(&mut config).unwrap();
}

#[test]
fn rejects_missing_termination() {
    let mut test = base_test_case();
    test.runtime = Duration::default();
    test.ops_deadline = 0;
    let err = check_config(&mut plan_with(test)).unwrap_err();
    assert!(
        format!("{err:#}").contains("Either stop_with_runtime or stop_with_ops needs to be set"),
        "unexpected error: {err:#}"
    );
}

#[test]
fn rejects_all_zero_weights() {
    let mut test = base_test_case();
    test.read_weight = 0;
    let err = check_config(&mut plan_with(test)).unwrap_err();
    assert!(
        format!("{err:#}").contains("At least one weight needs to be set - Read / Write / List / Delete"),
        "unexpected error: {err:#}"
    );
}

#[test]
fn rejects_existing_read_without_bucket_prefix() {
    let mut test = base_test_case();
    test.existing_read_weight = 1;
    test.bucket_prefix = String::new();
    let err = check_config(&mut plan_with(test)).unwrap_err();
    assert!(
        format!("{err:#}")
            .contains("When using existing_read_weight, setting the bucket_prefix is mandatory"),
        "unexpected error: {err:#}"
    );
}

#[test]
fn rejects_zero_bucket_minimum() {
    let mut test = base_test_case();
    test.buckets.number_min = 0;
    let err = check_config(&mut plan_with(test)).unwrap_err();
    assert!(format!("{err:#}").contains("Please set minimum number of Buckets"));
}

#[test]
fn rejects_zero_object_sizes_and_counts() {
    for field in ["size_min", "size_max", "number_min"] {
        let mut test = base_test_case();
        match field {
            "size_min" => test.objects.size_min = 0,
            "size_max" => test.objects.size_max = 0,
            _ => test.objects.number_min = 0,
        }
        let err = check_config(&mut plan_with(test)).unwrap_err();
        assert!(
            format!("{err:#}").contains("Please set"),
            "field {field}: unexpected error {err:#}"
        );
    }
}

#[test]
fn rejects_unknown_unit() {
    let mut test = base_test_case();
    test.objects.unit = "PB".into();
    let err = check_config(&mut plan_with(test)).unwrap_err();
    assert!(
        format!("{err:#}").contains("Could not parse unit size - please use one of B/KB/MB/GB/TB")
    );

    let mut test = base_test_case();
    test.objects.unit = String::new();
    assert!(check_config(&mut plan_with(test)).is_err());
}

#[test]
fn scales_sizes_to_bytes() {
    let mut test = base_test_case();
    test.objects.size_min = 4;
    test.objects.size_max = 4;
    test.objects.part_size = 2;
    test.objects.unit = "KB".into();
    let mut config = plan_with(test);
    check_config(&mut config).unwrap();
    assert_eq!(config.tests[0].objects.size_min, 4096);
    assert_eq!(config.tests[0].objects.size_max, 4096);
    assert_eq!(config.tests[0].objects.part_size, 2048);
}

#[test]
fn unit_aliases_share_multipliers() {
    for (unit, expected) in [
        ("B", 1u64),
        ("K", 1 << 10),
        ("kb", 1 << 10),
        ("M", 1 << 20),
        ("MB", 1 << 20),
        ("G", 1 << 30),
        ("T", 1 << 40),
    ] {
        let mut test = base_test_case();
        test.objects.size_min = 1;
        test.objects.size_max = 1;
        test.objects.unit = unit.into();
        let mut config = plan_with(test);
        check_config(&mut config).unwrap();
        assert_eq!(config.tests[0].objects.size_min, expected, "unit {unit}");
    }
}

#[test]
fn rejects_empty_endpoint_and_test_lists() {
    let mut config = Testconf {
        s3_config: vec![],
        grafana_config: None,
        tests: vec![base_test_case()],
    };
    assert!(check_config(&mut config).is_err());

    let mut config = Testconf {
        s3_config: vec![S3Configuration::default()],
        grafana_config: None,
        tests: vec![],
    };
    assert!(check_config(&mut config).is_err());
}

const PLAN_YAML: &str = r#"
s3_config:
  - access_key: secret
    secret_key: secret
    region: us-east-1
    endpoint: https://s3.example.com:9000
    timeout: 60s
    skipSSLverify: true
    usePathStyle: true
grafana_config:
  username: admin
  password: grafana
  endpoint: http://grafana
tests:
  - name: mixed
    read_weight: 20
    write_weight: 80
    objects:
      size_min: 5
      size_max: 100
      part_size: 0
      unit: KB
      number_min: 10
      number_max: 100
      number_distribution: constant
      size_distribution: random
    buckets:
      number_min: 1
      number_max: 10
      number_distribution: sequential
    bucket_prefix: 1255gosbench-
    object_prefix: obj
    stop_with_runtime: 60s
    stop_with_ops: 0
    workers: 2
    workers_share_buckets: true
    parallel_clients: 3
    clean_after: true
"#;

#[test]
fn loads_yaml_plans() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(PLAN_YAML.as_bytes()).unwrap();

    let mut config = load_config_from_file(file.path()).unwrap();
    assert_eq!(config.s3_config.len(), 1);
    assert!(config.s3_config[0].skip_ssl_verify);
    assert_eq!(config.s3_config[0].timeout, Duration::from_secs(60));
    assert_eq!(config.tests.len(), 1);
    assert_eq!(config.tests[0].runtime, Duration::from_secs(60));
    assert_eq!(config.tests[0].workers, 2);
    assert_eq!(
        config.tests[0].buckets.number_distribution,
        Distribution::Sequential
    );
    assert_eq!(config.grafana_config.as_ref().unwrap().username, "admin");

    check_config(&mut config).unwrap();
    assert_eq!(config.tests[0].objects.size_min, 5 * 1024);
}

#[test]
fn loads_json_plans() {
    let plan = plan_with(base_test_case());
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    file.write_all(serde_json::to_string(&plan).unwrap().as_bytes())
        .unwrap();

    let config = load_config_from_file(file.path()).unwrap();
    assert_eq!(config.tests[0].name, "unit");
    assert_eq!(config.tests[0].ops_deadline, 10);
}

#[test]
fn rejects_unknown_config_extension() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(b"tests = []").unwrap();
    let err = load_config_from_file(file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("must be a yaml or json formatted file"));
}

#[test]
fn rejects_unknown_distribution_at_parse_time() {
    let broken = PLAN_YAML.replace("number_distribution: sequential", "number_distribution: pareto");
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(broken.as_bytes()).unwrap();
    let err = load_config_from_file(file.path()).unwrap_err();
    let text = format!("{err:#}");
    assert!(
        text.contains("constant") && text.contains("sequential"),
        "error should name the allowed distributions: {text}"
    );
}
