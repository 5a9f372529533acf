use controlplane::appintent::AppIntent;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&AppIntent::crd())?);
    Ok(())
}
