use kube::CustomResourceExt;
use launchpad_operator::{Application, DataSource, ManagedService};

fn main() -> anyhow::Result<()> {
    let crds = [Application::crd(), ManagedService::crd(), DataSource::crd()];
    for (i, crd) in crds.iter().enumerate() {
        if i > 0 {
            println!("---");
        }
        print!("{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
