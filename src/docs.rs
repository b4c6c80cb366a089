use crate::api::assignments::AssignmentPayload;
use crate::api::attendance::{
    AttendanceEntry, BulkUpdateAttendance, BulkUpdateResult, HistoryResponse, MarkAttendance,
    MarkEntry, MarkResult, UpdateAttendance,
};
use crate::api::classes::{ClassPayload, ClassWithCount};
use crate::api::me::{ChangePassword, UpdateProfile};
use crate::api::reports::{
    AttendanceReport, ClassReport, ClassReportResponse, LowAttendanceStudent, MonthSummary,
    Overview, ReportGroup, RoleCounts, SortOrder, StudentReport, SubjectSummary,
};
use crate::api::subjects::SubjectPayload;
use crate::api::users::{CreateUser, UserListResponse};
use crate::model::{
    attendance::{AttendanceRecord, AttendanceStatus},
    class::Class,
    class_subject::Assignment,
    role::{AccountStatus, Role},
    subject::Subject,
    user::User,
};
use crate::models::{LoginReqDto, LoginResponse};
use crate::stats::{AttendanceSummary, GroupKey};
use utoipa::Modify;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Student Attendance Management API",
        version = "1.0.0",
        description = r#"
## Student Attendance Management System (SAMS)

Role-based attendance tracking for schools: **admins** manage users, classes,
subjects and teacher assignments; **teachers** mark and amend attendance for
the classes they teach; **students** follow their own attendance.

### 🔹 Key Features
- **Attendance**
  - Mark a whole class for a subject and day, edit within the edit window, bulk edits
- **Reports**
  - Grouped summaries (student, student/subject, class, subject, month)
  - Low-attendance detection against the configured minimum
  - Per-student overall, subject-wise and monthly breakdown
- **Administration**
  - Users, classes, subjects and teacher assignments

### 🔐 Security
All `/api` endpoints require a **JWT Bearer** access token from `/auth/login`.
Repeated failed logins lock the account temporarily.

### 📦 Response Format
- JSON responses, errors as `{"message": "..."}`
- Pagination on user and attendance lists
"#,
    ),
    paths(
        crate::auth::handlers::login,
        crate::auth::handlers::refresh_token,
        crate::auth::handlers::logout,

        crate::api::users::create_user,
        crate::api::users::list_users,
        crate::api::users::get_user,
        crate::api::users::update_user,
        crate::api::users::delete_user,

        crate::api::classes::create_class,
        crate::api::classes::list_classes,
        crate::api::classes::get_class,
        crate::api::classes::update_class,
        crate::api::classes::delete_class,
        crate::api::classes::list_class_students,

        crate::api::subjects::create_subject,
        crate::api::subjects::list_subjects,
        crate::api::subjects::get_subject,
        crate::api::subjects::update_subject,
        crate::api::subjects::delete_subject,

        crate::api::assignments::create_assignment,
        crate::api::assignments::list_assignments,
        crate::api::assignments::delete_assignment,

        crate::api::attendance::mark_attendance,
        crate::api::attendance::list_attendance,
        crate::api::attendance::update_attendance,
        crate::api::attendance::bulk_update_attendance,

        crate::api::reports::attendance_report,
        crate::api::reports::low_attendance,
        crate::api::reports::class_report,
        crate::api::reports::overview,
        crate::api::reports::student_report,

        crate::api::me::get_profile,
        crate::api::me::update_profile,
        crate::api::me::change_password,
        crate::api::me::my_attendance,
        crate::api::me::my_assignments
    ),
    components(
        schemas(
            LoginReqDto,
            LoginResponse,
            Role,
            AccountStatus,
            User,
            CreateUser,
            UserListResponse,
            Class,
            ClassPayload,
            ClassWithCount,
            Subject,
            SubjectPayload,
            Assignment,
            AssignmentPayload,
            AttendanceStatus,
            AttendanceRecord,
            MarkEntry,
            MarkAttendance,
            MarkResult,
            AttendanceEntry,
            HistoryResponse,
            UpdateAttendance,
            BulkUpdateAttendance,
            BulkUpdateResult,
            AttendanceSummary,
            GroupKey,
            SortOrder,
            ReportGroup,
            AttendanceReport,
            SubjectSummary,
            LowAttendanceStudent,
            ClassReport,
            ClassReportResponse,
            MonthSummary,
            StudentReport,
            RoleCounts,
            Overview,
            UpdateProfile,
            ChangePassword
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Login, token refresh and logout"),
        (name = "Users", description = "User administration (admin)"),
        (name = "Classes", description = "Class administration"),
        (name = "Subjects", description = "Subject administration"),
        (name = "Assignments", description = "Teacher to class/subject assignments"),
        (name = "Attendance", description = "Attendance marking and history"),
        (name = "Reports", description = "Attendance summaries and low-attendance reports"),
        (name = "Me", description = "Caller's own profile, attendance and assignments"),
    )
)]
pub struct ApiDoc;

/// Registers the `bearer_auth` scheme referenced by `security(...)`.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_protected_paths_and_bearer_scheme() {
        let doc = ApiDoc::openapi();

        assert!(doc.paths.paths.contains_key("/api/attendance"));
        assert!(doc.paths.paths.contains_key("/api/reports/students/{student_id}"));
        assert!(doc.paths.paths.contains_key("/auth/login"));

        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}
