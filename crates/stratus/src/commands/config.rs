pub fn handle() -> anyhow::Result<()> {
    let (config, path) = stratus_config::load_effective()?;
    match &path {
        Some(path) => println!("# loaded from {}", path.display()),
        None => println!("# no configuration file found, showing defaults"),
    }
    print!("{}", config.to_yaml_string()?);
    Ok(())
}
