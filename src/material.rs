use super::*;
use std::collections::HashMap;

/// Material input parameters from the [materials] table of the config file.
/// Fermi potentials are given in neV, the absorption cross-section as a
/// macroscopic value in 1/m at 2200 m/s.
#[derive(Deserialize, Clone)]
pub struct MaterialParameters {
    #[serde(default)]
    pub fermi_real: f64,
    #[serde(default)]
    pub fermi_imag: f64,
    #[serde(default = "default_diffuse_model")]
    pub diffuse: DiffuseModel,
    #[serde(default)]
    pub sigma_abs_2200: f64,
    #[serde(default = "default_false")]
    pub vacuum: bool,
}

fn default_diffuse_model() -> DiffuseModel {
    DiffuseModel::LAMBERT { probability: 0. }
}

fn default_false() -> bool {
    false
}

/// A wall material as the surface response sees it. Potentials are stored in
/// Joules.
#[derive(Clone, Debug)]
pub struct Material {
    pub name: String,
    pub fermi_real: f64,
    pub fermi_imag: f64,
    pub diffuse: DiffuseModel,
    pub sigma_abs_2200: f64,
    pub vacuum: bool,
}

impl Material {
    pub fn new(name: &str, parameters: &MaterialParameters) -> Material {
        Material {
            name: name.to_string(),
            fermi_real: parameters.fermi_real * NEV,
            fermi_imag: parameters.fermi_imag * NEV,
            diffuse: parameters.diffuse,
            sigma_abs_2200: parameters.sigma_abs_2200,
            vacuum: parameters.vacuum,
        }
    }

    /// The ambient vacuum the default solid is made of.
    pub fn vacuum() -> Material {
        Material {
            name: "vacuum".to_string(),
            fermi_real: 0.,
            fermi_imag: 0.,
            diffuse: DiffuseModel::LAMBERT { probability: 0. },
            sigma_abs_2200: 0.,
            vacuum: true,
        }
    }

    /// Per-bounce absorption probability for a transmission attempt with
    /// normal energy `e_perp` against a potential step `du` into this
    /// material. Reduces to the standard UCN loss 2*eta*sqrt(E/(U-E)) near
    /// the threshold for small eta = W/U and stays finite above it.
    pub fn loss_probability(&self, e_perp: f64, du: f64) -> f64 {
        if self.fermi_imag <= 0. || self.fermi_real <= 0. {
            return 0.;
        }
        let eta = self.fermi_imag / self.fermi_real;
        let denominator = (e_perp - du).abs().max(1E-3 * NEV);
        1. - (-2. * eta * (e_perp / denominator).sqrt()).exp()
    }

    /// Absorption rate in 1/s while travelling inside this material: the
    /// imaginary optical potential plus the 1/v-law cross-section term (which
    /// is velocity independent once folded with the 1/v law).
    pub fn bulk_absorption_rate(&self) -> f64 {
        2. * self.fermi_imag / HBAR + self.sigma_abs_2200 * V_THERMAL
    }
}

/// A triangulated region of space owning a material, a priority that resolves
/// overlaps, and an optional activity window in time.
#[derive(Clone, Debug)]
pub struct Solid {
    pub name: String,
    pub material_index: usize,
    pub priority: i32,
    pub time_window: Option<(f64, f64)>,
}

impl Solid {
    pub fn is_active(&self, t: f64) -> bool {
        match self.time_window {
            Some((t_on, t_off)) => t >= t_on && t <= t_off,
            None => true,
        }
    }
}

/// Immutable registry mapping solids to materials. Solid index 0 is always
/// the ambient default solid covering all space.
pub struct MaterialRegistry {
    pub materials: Vec<Material>,
    pub solids: Vec<Solid>,
}

impl MaterialRegistry {
    pub fn new(
        material_parameters: &HashMap<String, MaterialParameters>,
        solid_specs: &[(String, String, i32, Option<(f64, f64)>)],
        default_material: Option<&str>,
    ) -> Result<MaterialRegistry, anyhow::Error> {
        let mut materials = vec![Material::vacuum()];
        let mut index_by_name: HashMap<String, usize> = HashMap::new();
        index_by_name.insert("vacuum".to_string(), 0);

        let mut names: Vec<&String> = material_parameters.keys().collect();
        names.sort();
        for name in names {
            index_by_name.insert(name.clone(), materials.len());
            materials.push(Material::new(name, &material_parameters[name]));
        }

        let default_index = match default_material {
            Some(name) => *index_by_name
                .get(name)
                .ok_or_else(|| anyhow!("Input error: unknown default material {}.", name))?,
            None => 0,
        };

        let mut solids = vec![Solid {
            name: "default".to_string(),
            material_index: default_index,
            priority: 1,
            time_window: None,
        }];
        for (name, material, priority, time_window) in solid_specs {
            let material_index = *index_by_name
                .get(material)
                .ok_or_else(|| anyhow!("Input error: solid {} uses unknown material {}.", name, material))?;
            solids.push(Solid {
                name: name.clone(),
                material_index,
                priority: *priority,
                time_window: *time_window,
            });
        }
        Ok(MaterialRegistry { materials, solids })
    }

    pub fn material_of(&self, solid_index: usize) -> &Material {
        &self.materials[self.solids[solid_index].material_index]
    }

    pub fn priority_of(&self, solid_index: usize) -> i32 {
        self.solids[solid_index].priority
    }
}
