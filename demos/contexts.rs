use rift::{config::Paths, state::State};

fn main() -> anyhow::Result<()> {
    let paths = Paths::discover()?;
    let Some(state) = State::load_optional(&paths.state)? else {
        println!("No state at {}; run the sync demo first.", paths.state.display());
        return Ok(());
    };

    println!("generated_at={}", state.generated_at.to_rfc3339());
    for cluster in &state.clusters {
        let namespace = match cluster.namespace.as_str() {
            "" => "-",
            ns => ns,
        };
        println!(
            "{}\t{}\t{}\t{}\t{}",
            cluster.kube_context, cluster.env, cluster.region, cluster.aws_profile, namespace
        );
    }
    Ok(())
}
