//! Print the Machine API CRDs as a multi-document YAML stream

use crds::{Machine, MachineSet};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    for crd in [Machine::crd(), MachineSet::crd()] {
        println!("---");
        print!("{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
