use kube::CustomResourceExt;

use locust_operator::locust::Locust;

fn main() {
    print!("{}", serde_yaml::to_string(&Locust::crd()).unwrap());
}
