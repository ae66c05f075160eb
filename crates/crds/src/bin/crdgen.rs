//! Prints the CustomResourceDefinitions owned by DCops as a YAML stream.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/server.yaml`

use crds::Server;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [Server::crd()];

    for crd in crds {
        println!("---");
        print!("{}", serde_yaml::to_string(&crd)?);
    }

    Ok(())
}
