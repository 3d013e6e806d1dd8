//! Prints the CRDs owned by CAPR as a multi-document YAML stream.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crds.yaml`

use crds::{RKEBootstrap, RKEControlPlane};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let crds = [RKEBootstrap::crd(), RKEControlPlane::crd()];
    for crd in &crds {
        println!("---");
        print!("{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
