use organoid_common::ExperimentConfig;
use anyhow::Result;
use log::info;
use serde::{Serialize, Deserialize};

/// Discrete biological type of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Variant {
    Luminal,
    Myoepithelial,
    LuminalStem,
    MyoepithelialStem,
    /// Inert extracellular-matrix particle (substrate).
    Ecm,
    Unlabeled,
}

/// Phenotype family used for homotypic/heterotypic pair classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Luminal,
    Myoepithelial,
    Ecm,
    Unlabeled,
}

/// Discrete type plus integrin surface-marker flags. An agent carries exactly
/// one variant at a time; replacing the variant is an atomic swap of the whole
/// `Phenotype`, while the integrin flags may be toggled in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phenotype {
    variant: Variant,
    b1_integrin: bool,
    b4_integrin: bool,
}

impl Phenotype {
    /// Creates a phenotype with the per-variant default integrin expression.
    pub fn new(variant: Variant) -> Self {
        let (b1_integrin, b4_integrin) = match variant {
            Variant::Luminal => (true, false),
            Variant::LuminalStem => (true, true),
            Variant::Myoepithelial => (false, false),
            Variant::MyoepithelialStem => (false, true),
            Variant::Ecm | Variant::Unlabeled => (false, false),
        };
        Phenotype { variant, b1_integrin, b4_integrin }
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn is(&self, variant: Variant) -> bool {
        self.variant == variant
    }

    pub fn b1_expression(&self) -> bool {
        self.b1_integrin
    }

    pub fn b4_expression(&self) -> bool {
        self.b4_integrin
    }

    pub fn set_b1_expression(&mut self, expressed: bool) {
        self.b1_integrin = expressed;
    }

    pub fn set_b4_expression(&mut self, expressed: bool) {
        self.b4_integrin = expressed;
    }

    /// Four-way visualization grouping derived from the integrin flags.
    pub fn colour(&self) -> u32 {
        self.b1_integrin as u32 + 2 * self.b4_integrin as u32
    }

    pub fn family(&self) -> Family {
        match self.variant {
            Variant::Luminal | Variant::LuminalStem => Family::Luminal,
            Variant::Myoepithelial | Variant::MyoepithelialStem => Family::Myoepithelial,
            Variant::Ecm => Family::Ecm,
            Variant::Unlabeled => Family::Unlabeled,
        }
    }

    /// True for biological cells, false for inert ECM particles.
    pub fn is_cell(&self) -> bool {
        self.variant != Variant::Ecm
    }

    /// True when the cell carries a lineage label (not `Unlabeled`, not ECM).
    pub fn is_labelled(&self) -> bool {
        !matches!(self.variant, Variant::Unlabeled | Variant::Ecm)
    }

    /// Terminally differentiated cells never re-enter the cell cycle.
    pub fn is_terminally_differentiated(&self) -> bool {
        matches!(self.variant, Variant::Luminal | Variant::Myoepithelial)
    }

    pub fn is_stem(&self) -> bool {
        matches!(self.variant, Variant::LuminalStem | Variant::MyoepithelialStem)
    }

    /// The differentiated variant produced when a stem cell divides
    /// asymmetrically. Non-stem variants map to themselves.
    pub fn differentiated_variant(&self) -> Variant {
        match self.variant {
            Variant::LuminalStem => Variant::Luminal,
            Variant::MyoepithelialStem => Variant::Myoepithelial,
            other => other,
        }
    }
}

/// One-shot integrin gain/loss-of-function perturbation applied to a selected
/// lineage at a configured simulation time.
#[derive(Debug, Clone)]
pub struct IntegrinExperiment {
    b1_gain: bool,
    b1_loss: bool,
    b4_gain: bool,
    b4_loss: bool,
    activation_time: f32,
    affects_luminal: bool,
    affects_myoepithelial: bool,
    applied: bool,
}

impl IntegrinExperiment {
    /// Builds the experiment from config, or `None` when no perturbation is
    /// requested. Incompatible flag combinations are fatal at setup.
    pub fn from_config(config: &ExperimentConfig) -> Result<Option<Self>> {
        if !config.any_flag_set() {
            return Ok(None);
        }
        if config.b1_gain_of_function && config.b1_loss_of_function {
            anyhow::bail!("Cannot request both gain and loss of function for B1 integrin.");
        }
        if config.b4_gain_of_function && config.b4_loss_of_function {
            anyhow::bail!("Cannot request both gain and loss of function for B4 integrin.");
        }
        if !config.affects_luminal && !config.affects_myoepithelial {
            anyhow::bail!("Integrin experiment configured but no affected cell lineage selected.");
        }
        Ok(Some(IntegrinExperiment {
            b1_gain: config.b1_gain_of_function,
            b1_loss: config.b1_loss_of_function,
            b4_gain: config.b4_gain_of_function,
            b4_loss: config.b4_loss_of_function,
            activation_time: config.activation_time_hours,
            affects_luminal: config.affects_luminal,
            affects_myoepithelial: config.affects_myoepithelial,
            applied: false,
        }))
    }

    /// Whether the perturbation has fired already.
    pub fn applied(&self) -> bool {
        self.applied
    }

    fn targets(&self, phenotype: &Phenotype) -> bool {
        match phenotype.family() {
            Family::Luminal => self.affects_luminal,
            Family::Myoepithelial => self.affects_myoepithelial,
            Family::Ecm | Family::Unlabeled => false,
        }
    }

    /// Applies the perturbation once when the simulation clock reaches the
    /// activation time. Flag toggles happen in place; the variant is untouched.
    pub fn maybe_apply<'a, I>(&mut self, current_time: f32, phenotypes: I) -> u32
    where
        I: Iterator<Item = &'a mut Phenotype>,
    {
        if self.applied || current_time < self.activation_time {
            return 0;
        }
        let mut affected = 0;
        for phenotype in phenotypes {
            if !self.targets(phenotype) {
                continue;
            }
            if self.b1_gain {
                phenotype.set_b1_expression(true);
            } else if self.b1_loss {
                phenotype.set_b1_expression(false);
            }
            if self.b4_gain {
                phenotype.set_b4_expression(true);
            } else if self.b4_loss {
                phenotype.set_b4_expression(false);
            }
            affected += 1;
        }
        self.applied = true;
        info!(
            "Integrin experiment applied at t={:.2} h to {} cells.",
            current_time, affected
        );
        affected
    }
}
