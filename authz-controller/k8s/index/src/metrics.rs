use crate::SharedIndex;
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};

#[derive(Debug)]
struct Instrumented(SharedIndex);

pub fn register(reg: &mut Registry, index: SharedIndex) {
    reg.register_collector(Box::new(Instrumented(index)));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let this = self.0.read();

        let mut size_encoder = encoder.encode_descriptor(
            "size",
            "The number of objects in the index",
            None,
            MetricType::Gauge,
        )?;
        for (kind, size) in [
            ("roletemplate", this.role_templates.len()),
            ("clusterrole", this.cluster_role_rules.len()),
            ("clusterroletemplatebinding", this.crtbs.len()),
            ("projectroletemplatebinding", this.prtbs.len()),
            ("globalrolebinding", this.grbs.len()),
            ("clusterrolebinding", this.crbs.len()),
            ("rolebinding", this.rbs.len()),
        ] {
            let labels = vec![("kind", kind)];
            let encoder = size_encoder.encode_family(&labels)?;
            ConstGauge::new(size as i64).encode(encoder)?;
        }

        let mut keys_encoder = encoder.encode_descriptor(
            "secondary_keys",
            "The number of distinct keys in each secondary index",
            None,
            MetricType::Gauge,
        )?;
        for (index, keys) in [
            ("role_template_inheritance", this.inherited_by.len()),
            ("bindings_by_role_template", this.bindings_by_role_template.len()),
            ("bindings_by_user", this.bindings_by_user.len()),
            ("clusterrolebindings_by_identity", this.crbs_by_identity.len()),
            ("clusterrolebindings_by_owner", this.crbs_by_owner.len()),
            ("rolebindings_by_identity", this.rbs_by_identity.len()),
            ("rolebindings_by_owner", this.rbs_by_owner.len()),
            ("rolebindings_by_owner_reference", this.rbs_by_owner_ref.len()),
        ] {
            let labels = vec![("index", index)];
            let encoder = keys_encoder.encode_family(&labels)?;
            ConstGauge::new(keys as i64).encode(encoder)?;
        }

        Ok(())
    }
}
