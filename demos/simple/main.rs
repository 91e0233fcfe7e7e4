use featurevisor::{Context, InstanceConfig, OverrideOptions};

pub fn main() {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "tests/data/datafile.json".to_owned());
    let datafile = std::fs::read_to_string(path).unwrap();

    let mut config = InstanceConfig::new();
    config.datafile_json(&datafile).unwrap();
    let instance = config.to_instance();

    let context: Context = [
        ("userId".to_owned(), "123".into()),
        ("device".to_owned(), "mobile".into()),
        ("country".to_owned(), "de".into()),
    ]
    .into();

    println!("Enabled: {}", instance.is_enabled("foo", &context));
    println!("Variation: {:?}", instance.get_variation("foo", &context));
    println!(
        "Variable: {:?}",
        instance.get_variable_string("foo", "bar", &context)
    );

    // Full evaluation, including the reason.
    let evaluation = instance.evaluate_variable("foo", "bar", &context, &OverrideOptions::default());
    println!("Evaluation: {}", serde_json::to_string_pretty(&evaluation).unwrap());
}
