use es_provisioner::crds::index::Index;
use kube::core::CustomResourceExt;

fn main() {
    println!(
        "{}",
        serde_yaml::to_string(&Index::crd()).expect("serialize crd")
    );
}
