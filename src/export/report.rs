use std::collections::HashMap;

use chrono::{DateTime, Utc};

use super::{
    generated_line,
    images::ImageSource,
    listing_file_name,
    pdf::{self, decode_image, Block},
    report_file_name,
    table::{self, Cell, Sheet},
    Artifact, ExportFormat,
};
use crate::{
    error::AppError,
    models::{observation::ObservationDetail, report_listing::long_date},
    storage::Bucket,
};

pub const MAIN_IMAGE: &str = "main";

/// Images referenced by the report, keyed `main` or by action plan id.
pub fn image_sources(detail: &ObservationDetail) -> Vec<(String, ImageSource)> {
    let main = detail
        .supporting_image
        .as_deref()
        .and_then(|raw| ImageSource::parse(raw, Bucket::SafetyImages))
        .map(|source| (MAIN_IMAGE.to_string(), source));
    let plans = detail.action_plans.iter().filter_map(|plan| {
        let source = ImageSource::parse(plan.supporting_image.as_deref()?, Bucket::ActionPlanImages)?;
        Some((plan._id.clone(), source))
    });
    main.into_iter().chain(plans).collect()
}

fn categories(detail: &ObservationDetail) -> String {
    detail
        .categories
        .iter()
        .map(|category| category.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn blocks(
    detail: &ObservationDetail,
    images: &HashMap<String, Vec<u8>>,
    generated_at: DateTime<Utc>,
) -> Vec<Block> {
    let image = |key: &str| Block::Image(images.get(key).and_then(|bytes| decode_image(bytes)));

    let mut blocks = vec![
        Block::Title("Safety Report".to_string()),
        Block::Subtitle(generated_line(generated_at)),
        Block::Heading("General Information".to_string()),
        Block::field("Report ID", detail._id.as_str()),
        Block::field("Project", detail.project_name()),
        Block::field("Company", detail.company_name()),
        Block::field("Submitter Name", detail.submitter_name.as_str()),
        Block::field("Date", long_date(detail.date)),
        Block::field("Time", detail.time.as_str()),
        Block::field("Department", detail.department.clone().unwrap_or_default()),
        Block::field("Location", detail.location.as_str()),
        Block::Heading("Observation Details".to_string()),
        Block::field("Subject", detail.subject.as_str()),
        Block::field("Report Group", detail.report_group.label()),
        Block::field("Safety Categories", categories(detail)),
        Block::field("Description", detail.description.as_str()),
        Block::Heading("Risk Assessment".to_string()),
        Block::colored_field(
            "Consequences",
            detail.consequences.as_str(),
            detail.consequences.colors().1,
        ),
        Block::field("Likelihood", detail.likelihood.as_str()),
        Block::colored_field("Status", detail.status.as_str(), detail.status.colors().1),
    ];

    if detail.supporting_image.is_some() {
        blocks.push(Block::Heading("Supporting Image".to_string()));
        blocks.push(image(MAIN_IMAGE));
    }

    if !detail.action_plans.is_empty() {
        blocks.push(Block::Heading("Action Plans".to_string()));
        for plan in detail.action_plans.iter() {
            blocks.push(Block::Paragraph(plan.action.clone()));
            blocks.push(Block::field("Due Date", long_date(plan.due_date)));
            blocks.push(Block::field("Responsible Person", plan.responsible_person.as_str()));
            blocks.push(Block::field("Follow-up Contact", plan.follow_up_contact.as_str()));
            blocks.push(Block::colored_field("Status", plan.status.as_str(), plan.status.colors().1));
            if plan.supporting_image.is_some() {
                blocks.push(image(&plan._id));
            }
            blocks.push(Block::Gap);
        }
    }
    blocks
}

fn fields(detail: &ObservationDetail) -> Vec<(String, String)> {
    let mut fields = vec![
        ("Report ID".to_string(), detail._id.clone()),
        ("Project".to_string(), detail.project_name().to_string()),
        ("Company".to_string(), detail.company_name().to_string()),
        ("Submitter Name".to_string(), detail.submitter_name.clone()),
        ("Date".to_string(), detail.date.to_string()),
        ("Time".to_string(), detail.time.clone()),
        ("Department".to_string(), detail.department.clone().unwrap_or_default()),
        ("Location".to_string(), detail.location.clone()),
        ("Subject".to_string(), detail.subject.as_str().to_string()),
        ("Report Group".to_string(), detail.report_group.label().to_string()),
        ("Safety Categories".to_string(), categories(detail)),
        ("Description".to_string(), detail.description.clone()),
        ("Consequences".to_string(), detail.consequences.as_str().to_string()),
        ("Likelihood".to_string(), detail.likelihood.as_str().to_string()),
        ("Status".to_string(), detail.status.as_str().to_string()),
        ("Created At".to_string(), detail.created_at.clone()),
    ];
    for (index, plan) in detail.action_plans.iter().enumerate() {
        let prefix = format!("Action Plan {}", index + 1);
        fields.push((format!("{prefix} - Action"), plan.action.clone()));
        fields.push((format!("{prefix} - Due Date"), plan.due_date.to_string()));
        fields.push((format!("{prefix} - Responsible Person"), plan.responsible_person.clone()));
        fields.push((format!("{prefix} - Follow-up Contact"), plan.follow_up_contact.clone()));
        fields.push((format!("{prefix} - Status"), plan.status.as_str().to_string()));
    }
    fields
}

pub fn sheet(detail: &ObservationDetail) -> Sheet {
    let mut sheet = Sheet::new("Safety Report", &["Field", "Value"]);
    for (field, value) in fields(detail) {
        sheet.push(vec![Cell::Text(field), Cell::Text(value)]);
    }
    sheet
}

fn plans_sheet(detail: &ObservationDetail) -> Sheet {
    let mut sheet = Sheet::new(
        "Action Plans",
        &["Action", "Due Date", "Responsible Person", "Follow-up Contact", "Status"],
    );
    for plan in detail.action_plans.iter() {
        sheet.push(vec![
            plan.action.as_str().into(),
            plan.due_date.to_string().into(),
            plan.responsible_person.as_str().into(),
            plan.follow_up_contact.as_str().into(),
            plan.status.as_str().into(),
        ]);
    }
    sheet
}

pub fn export(
    detail: &ObservationDetail,
    images: &HashMap<String, Vec<u8>>,
    generated_at: DateTime<Utc>,
    format: ExportFormat,
) -> Result<Artifact, AppError> {
    let bytes = match format {
        ExportFormat::Pdf => pdf::render(
            "Safety Report",
            &blocks(detail, images, generated_at),
            pdf::A4_PORTRAIT,
        )?,
        ExportFormat::Csv => table::to_csv(&sheet(detail))?,
        ExportFormat::Xlsx => table::to_xlsx(&[sheet(detail), plans_sheet(detail)])?,
    };
    Ok(Artifact::new(
        report_file_name(&detail._id, generated_at, format),
        format,
        bytes,
    ))
}

pub fn listing_sheet(details: &[ObservationDetail]) -> Sheet {
    let mut sheet = Sheet::new(
        "Safety Reports",
        &[
            "Report ID",
            "Subject",
            "Submitter",
            "Date",
            "Project",
            "Company",
            "Description",
            "Severity",
            "Status",
            "Created At",
        ],
    );
    for detail in details {
        sheet.push(vec![
            detail._id.as_str().into(),
            detail.subject.as_str().into(),
            detail.submitter_name.as_str().into(),
            long_date(detail.date).into(),
            detail.project_name().into(),
            detail.company_name().into(),
            detail.description.as_str().into(),
            detail.consequences.as_str().into(),
            detail.status.as_str().into(),
            detail.created_at.as_str().into(),
        ]);
    }
    sheet
}

pub fn listing_export(details: &[ObservationDetail], generated_at: DateTime<Utc>) -> Result<Artifact, AppError> {
    Ok(Artifact::new(
        listing_file_name(generated_at),
        ExportFormat::Csv,
        table::to_csv(&listing_sheet(details))?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        action_plan::ActionPlanResponse,
        observation::{CategoryRef, Consequence, Likelihood, NamedRef, ReportGroup, Status, Subject},
    };
    use chrono::{NaiveDate, TimeZone};

    fn detail() -> ObservationDetail {
        ObservationDetail {
            _id: "665f1c2b9d1e8a0012345678".to_string(),
            project_id: "p".to_string(),
            company_id: "c".to_string(),
            project: Some(NamedRef {
                _id: "p".to_string(),
                name: "North Pit".to_string(),
            }),
            company: Some(NamedRef {
                _id: "c".to_string(),
                name: "Acme Mining".to_string(),
            }),
            submitter_name: "Jane Roe".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 5, 14).unwrap(),
            time: "09:30".to_string(),
            location: "Conveyor 4".to_string(),
            department: Some("Processing".to_string()),
            description: "Exposed cabling near walkway".to_string(),
            subject: Subject::Sor,
            report_group: ReportGroup::Operations,
            consequences: Consequence::Major,
            likelihood: Likelihood::Likely,
            status: Status::Open,
            supporting_image: Some("1715-cable.png".to_string()),
            created_by: "u".to_string(),
            created_at: "2024-05-14T09:31:00.000Z".to_string(),
            updated_at: "2024-05-14T09:31:00.000Z".to_string(),
            categories: vec![CategoryRef {
                _id: "cat".to_string(),
                name: "Electrical".to_string(),
                icon: "zap".to_string(),
            }],
            action_plans: vec![ActionPlanResponse {
                _id: "plan-1".to_string(),
                observation_id: "665f1c2b9d1e8a0012345678".to_string(),
                action: "Install cable tray".to_string(),
                due_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
                responsible_person: "Electrician".to_string(),
                follow_up_contact: "HSE".to_string(),
                status: Status::Open,
                supporting_image: Some("https://cdn.example.com/tray.jpg".to_string()),
                created_at: String::new(),
            }],
        }
    }

    #[test]
    fn image_sources_use_matching_buckets() {
        let sources = image_sources(&detail());
        assert_eq!(sources.len(), 2);
        assert_eq!(
            sources[0],
            (
                MAIN_IMAGE.to_string(),
                ImageSource::Stored {
                    bucket: Bucket::SafetyImages,
                    path: "1715-cable.png".to_string()
                }
            )
        );
        assert!(matches!(&sources[1].1, ImageSource::Remote(_)));
    }

    #[test]
    fn repeated_exports_differ_only_in_timestamp() {
        let first = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2024, 6, 2, 17, 45, 0).unwrap();
        let images = HashMap::new();

        let a = blocks(&detail(), &images, first);
        let b = blocks(&detail(), &images, second);

        assert_eq!(a.len(), b.len());
        let differing: Vec<usize> = (0..a.len()).filter(|&i| a[i] != b[i]).collect();
        assert_eq!(differing, vec![1]);
        assert!(matches!(&a[1], Block::Subtitle(_)));
    }

    #[test]
    fn unloaded_images_become_placeholders() {
        let blocks = blocks(&detail(), &HashMap::new(), Utc::now());
        let placeholders = blocks
            .iter()
            .filter(|block| matches!(block, Block::Image(None)))
            .count();
        assert_eq!(placeholders, 2);
    }

    #[test]
    fn csv_lists_fields_then_plans() {
        let generated_at = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let artifact = export(&detail(), &HashMap::new(), generated_at, ExportFormat::Csv).unwrap();
        let csv = String::from_utf8(artifact.bytes).unwrap();

        assert_eq!(artifact.file_name, "safety-report-665f1c2b9d1e8a0012345678-2024-06-01.csv");
        assert!(csv.starts_with("Field,Value\n"));
        assert!(csv.contains("Consequences,major"));
        assert!(csv.contains("Action Plan 1 - Action,Install cable tray"));
    }

    #[test]
    fn listing_csv_uses_fixed_columns() {
        let generated_at = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let artifact = listing_export(&[detail()], generated_at).unwrap();
        let csv = String::from_utf8(artifact.bytes).unwrap();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(artifact.file_name, "safety-reports-2024-06-01.csv");
        assert_eq!(
            lines[0],
            "Report ID,Subject,Submitter,Date,Project,Company,Description,Severity,Status,Created At"
        );
        assert!(lines[1].contains("\"May 14, 2024\",North Pit,Acme Mining"));
    }

    #[test]
    fn pdf_and_xlsx_render() {
        let generated_at = Utc::now();
        let pdf = export(&detail(), &HashMap::new(), generated_at, ExportFormat::Pdf).unwrap();
        assert!(pdf.bytes.starts_with(b"%PDF"));
        assert_eq!(pdf.content_type, "application/pdf");

        let xlsx = export(&detail(), &HashMap::new(), generated_at, ExportFormat::Xlsx).unwrap();
        assert!(xlsx.bytes.starts_with(b"PK"));
    }
}
