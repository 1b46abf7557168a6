use che_gateway_operator::crd::{CheManager, WorkspaceRouting};
use kube::CustomResourceExt;

fn main() {
    print!("{}", serde_yaml::to_string(&CheManager::crd()).unwrap());
    println!("---");
    print!("{}", serde_yaml::to_string(&WorkspaceRouting::crd()).unwrap());
}
