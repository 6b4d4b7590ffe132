use clap::{Args, Subcommand};
use uuid::Uuid;

use super::{confirm, OutputFormat};
use stitchbook::models::MeasurementTemplate;
use stitchbook::Workshop;

#[derive(Args)]
pub struct TemplateCommand {
    #[command(subcommand)]
    pub command: TemplateSubcommand,
}

#[derive(Subcommand)]
pub enum TemplateSubcommand {
    /// Create a measurement template
    Add {
        /// Template name (e.g. "Men's trouser")
        name: String,

        /// Measurement label (can be repeated, order is kept)
        #[arg(long = "field", value_name = "LABEL")]
        fields: Vec<String>,

        /// Gender the template applies to
        #[arg(long)]
        gender: Option<String>,
    },

    /// List all templates
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Update a template
    Update {
        /// Template ID (UUID) or name
        identifier: String,

        /// New name
        #[arg(long)]
        name: Option<String>,

        /// Append a label (can be repeated)
        #[arg(long = "add-field", value_name = "LABEL")]
        add_fields: Vec<String>,

        /// Remove a label (can be repeated)
        #[arg(long = "remove-field", value_name = "LABEL")]
        remove_fields: Vec<String>,

        /// Gender the template applies to
        #[arg(long)]
        gender: Option<String>,
    },

    /// Delete a template
    Delete {
        /// Template ID (UUID) or name
        identifier: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

impl TemplateCommand {
    pub fn writes(&self) -> bool {
        !matches!(self.command, TemplateSubcommand::List { .. })
    }

    pub async fn run(&self, workshop: &Workshop) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            TemplateSubcommand::Add {
                name,
                fields,
                gender,
            } => {
                if name.trim().is_empty() {
                    return Err("Template name cannot be empty".into());
                }

                let mut template = MeasurementTemplate::new(workshop.owner_id(), name.trim())
                    .with_fields(dedup_fields(fields));
                if let Some(gender) = gender {
                    template = template.with_gender(gender);
                }

                let created = workshop.add_template(template).await?;
                println!("Created template: {}", created);
                Ok(())
            }

            TemplateSubcommand::List { format } => {
                let templates: Vec<MeasurementTemplate> = workshop.list().await?;
                if templates.is_empty() {
                    println!("No templates found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&templates)?);
                    }
                    OutputFormat::Text => {
                        for template in &templates {
                            println!("{}  {}", template.meta.id, template);
                        }
                        println!("\nTotal: {} template(s)", templates.len());
                    }
                }
                Ok(())
            }

            TemplateSubcommand::Update {
                identifier,
                name,
                add_fields,
                remove_fields,
                gender,
            } => {
                let has_updates = name.is_some()
                    || !add_fields.is_empty()
                    || !remove_fields.is_empty()
                    || gender.is_some();
                if !has_updates {
                    return Err("Nothing to update. Provide at least one option.".into());
                }

                let template = find_template(workshop, identifier).await?;
                let updated = workshop
                    .update::<MeasurementTemplate, _>(template.meta.id, |t| {
                        if let Some(name) = name {
                            t.name = name.clone();
                        }
                        for field in add_fields {
                            if !t.fields.iter().any(|f| f.eq_ignore_ascii_case(field)) {
                                t.fields.push(field.clone());
                            }
                        }
                        t.fields
                            .retain(|f| !remove_fields.iter().any(|r| r.eq_ignore_ascii_case(f)));
                        if let Some(gender) = gender {
                            t.gender = Some(gender.clone());
                        }
                    })
                    .await?;

                println!("Updated template: {}", updated);
                Ok(())
            }

            TemplateSubcommand::Delete { identifier, force } => {
                let template = find_template(workshop, identifier).await?;

                if !force && !confirm(&format!("Delete template '{}'?", template.name))? {
                    println!("Deletion cancelled.");
                    return Ok(());
                }

                workshop
                    .delete::<MeasurementTemplate>(template.meta.id)
                    .await?;
                println!("Deleted template: {}", template.name);
                Ok(())
            }
        }
    }
}

fn dedup_fields(fields: &[String]) -> Vec<String> {
    let mut result: Vec<String> = Vec::with_capacity(fields.len());
    for field in fields {
        let field = field.trim();
        if !field.is_empty() && !result.iter().any(|f| f.eq_ignore_ascii_case(field)) {
            result.push(field.to_string());
        }
    }
    result
}

pub(crate) async fn find_template(
    workshop: &Workshop,
    identifier: &str,
) -> Result<MeasurementTemplate, Box<dyn std::error::Error>> {
    let found = if let Ok(id) = Uuid::parse_str(identifier) {
        workshop.get::<MeasurementTemplate>(id).await?
    } else {
        let templates: Vec<MeasurementTemplate> = workshop.list().await?;
        templates
            .into_iter()
            .find(|t| t.name.eq_ignore_ascii_case(identifier))
    };

    found.ok_or_else(|| format!("Template not found: {}", identifier).into())
}
