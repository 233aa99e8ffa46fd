//! Embedded standard-library headers
//!
//! A small set of header texts baked into the binary so common system
//! headers resolve without a host toolchain. Angle-bracket includes
//! consult this table first when the embedded-stdlib option is on; the
//! opt-out flag falls back to the system search paths. The headers
//! declare the 64-bit host data model (`int` 32, `long`/pointers 64).

/// Look up an embedded header by its include spelling.
pub fn get_std_header(name: &str) -> Option<&'static str> {
    HEADERS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, text)| *text)
}

/// Names of every embedded header, for diagnostics and tests.
pub fn header_names() -> impl Iterator<Item = &'static str> {
    HEADERS.iter().map(|(n, _)| *n)
}

const HEADERS: &[(&str, &str)] = &[
    ("assert.h", ASSERT_H),
    ("ctype.h", CTYPE_H),
    ("errno.h", ERRNO_H),
    ("float.h", FLOAT_H),
    ("inttypes.h", INTTYPES_H),
    ("limits.h", LIMITS_H),
    ("math.h", MATH_H),
    ("stdarg.h", STDARG_H),
    ("stdbool.h", STDBOOL_H),
    ("stddef.h", STDDEF_H),
    ("stdint.h", STDINT_H),
    ("stdio.h", STDIO_H),
    ("stdlib.h", STDLIB_H),
    ("string.h", STRING_H),
    ("time.h", TIME_H),
];

const ASSERT_H: &str = r#"#ifndef __ASSERT_H
#define __ASSERT_H

void __assert_fail(const char *expr, const char *file, int line, const char *func);

#ifdef NDEBUG
#define assert(x) ((void)0)
#else
#define assert(x) ((x) ? (void)0 : __assert_fail(#x, __FILE__, __LINE__, 0))
#endif

#define static_assert _Static_assert

#endif
"#;

const CTYPE_H: &str = r#"#ifndef __CTYPE_H
#define __CTYPE_H

int isalnum(int c);
int isalpha(int c);
int isblank(int c);
int iscntrl(int c);
int isdigit(int c);
int isgraph(int c);
int islower(int c);
int isprint(int c);
int ispunct(int c);
int isspace(int c);
int isupper(int c);
int isxdigit(int c);
int tolower(int c);
int toupper(int c);

#endif
"#;

const ERRNO_H: &str = r#"#ifndef __ERRNO_H
#define __ERRNO_H

extern int errno;

#define EDOM   33
#define EILSEQ 84
#define ERANGE 34

#endif
"#;

const FLOAT_H: &str = r#"#ifndef __FLOAT_H
#define __FLOAT_H

#define FLT_RADIX 2

#define FLT_DIG 6
#define FLT_EPSILON 1.19209290e-7f
#define FLT_MANT_DIG 24
#define FLT_MAX 3.40282347e+38f
#define FLT_MIN 1.17549435e-38f

#define DBL_DIG 15
#define DBL_EPSILON 2.2204460492503131e-16
#define DBL_MANT_DIG 53
#define DBL_MAX 1.7976931348623157e+308
#define DBL_MIN 2.2250738585072014e-308

#define LDBL_DIG DBL_DIG
#define LDBL_EPSILON DBL_EPSILON
#define LDBL_MANT_DIG DBL_MANT_DIG
#define LDBL_MAX DBL_MAX
#define LDBL_MIN DBL_MIN

#endif
"#;

const INTTYPES_H: &str = r#"#ifndef __INTTYPES_H
#define __INTTYPES_H

#include <stdint.h>

#define PRId8  "d"
#define PRId16 "d"
#define PRId32 "d"
#define PRId64 "ld"
#define PRIu8  "u"
#define PRIu16 "u"
#define PRIu32 "u"
#define PRIu64 "lu"
#define PRIx8  "x"
#define PRIx16 "x"
#define PRIx32 "x"
#define PRIx64 "lx"

intmax_t strtoimax(const char *nptr, char **endptr, int base);
uintmax_t strtoumax(const char *nptr, char **endptr, int base);

#endif
"#;

const LIMITS_H: &str = r#"#ifndef __LIMITS_H
#define __LIMITS_H

#define CHAR_BIT 8

#define SCHAR_MIN (-128)
#define SCHAR_MAX 127
#define UCHAR_MAX 255
#define CHAR_MIN SCHAR_MIN
#define CHAR_MAX SCHAR_MAX

#define SHRT_MIN (-32768)
#define SHRT_MAX 32767
#define USHRT_MAX 65535

#define INT_MIN (-2147483647 - 1)
#define INT_MAX 2147483647
#define UINT_MAX 4294967295U

#define LONG_MIN (-9223372036854775807L - 1)
#define LONG_MAX 9223372036854775807L
#define ULONG_MAX 18446744073709551615UL

#define LLONG_MIN LONG_MIN
#define LLONG_MAX LONG_MAX
#define ULLONG_MAX ULONG_MAX

#endif
"#;

const MATH_H: &str = r#"#ifndef __MATH_H
#define __MATH_H

#define M_E  2.7182818284590452354
#define M_PI 3.14159265358979323846

#define HUGE_VAL  (1.0 / 0.0)
#define INFINITY  (1.0f / 0.0f)
#define NAN       (0.0f / 0.0f)

double acos(double x);
double asin(double x);
double atan(double x);
double atan2(double y, double x);
double ceil(double x);
double cos(double x);
double cosh(double x);
double exp(double x);
double fabs(double x);
double floor(double x);
double fmod(double x, double y);
double log(double x);
double log10(double x);
double pow(double x, double y);
double round(double x);
double sin(double x);
double sinh(double x);
double sqrt(double x);
double tan(double x);
double tanh(double x);
double trunc(double x);

float fabsf(float x);
float floorf(float x);
float powf(float x, float y);
float sqrtf(float x);

#endif
"#;

const STDARG_H: &str = r#"#ifndef __STDARG_H
#define __STDARG_H

typedef char *va_list;

#define va_start(ap, last) ((ap) = (char *)0)
#define va_arg(ap, ty) (*(ty *)0)
#define va_end(ap) ((void)0)
#define va_copy(dst, src) ((dst) = (src))

#endif
"#;

const STDBOOL_H: &str = r#"#ifndef __STDBOOL_H
#define __STDBOOL_H

#define bool _Bool
#define true 1
#define false 0
#define __bool_true_false_are_defined 1

#endif
"#;

const STDDEF_H: &str = r#"#ifndef __STDDEF_H
#define __STDDEF_H

typedef unsigned long size_t;
typedef long ptrdiff_t;
typedef unsigned int wchar_t;
typedef long max_align_t;

#define NULL ((void *)0)
#define offsetof(ty, member) ((size_t)&(((ty *)0)->member))

#endif
"#;

const STDINT_H: &str = r#"#ifndef __STDINT_H
#define __STDINT_H

typedef signed char int8_t;
typedef short int16_t;
typedef int int32_t;
typedef long int64_t;

typedef unsigned char uint8_t;
typedef unsigned short uint16_t;
typedef unsigned int uint32_t;
typedef unsigned long uint64_t;

typedef long intptr_t;
typedef unsigned long uintptr_t;
typedef long intmax_t;
typedef unsigned long uintmax_t;

#define INT8_MIN (-128)
#define INT8_MAX 127
#define UINT8_MAX 255
#define INT16_MIN (-32768)
#define INT16_MAX 32767
#define UINT16_MAX 65535
#define INT32_MIN (-2147483647 - 1)
#define INT32_MAX 2147483647
#define UINT32_MAX 4294967295U
#define INT64_MIN (-9223372036854775807L - 1)
#define INT64_MAX 9223372036854775807L
#define UINT64_MAX 18446744073709551615UL

#define INTPTR_MIN INT64_MIN
#define INTPTR_MAX INT64_MAX
#define UINTPTR_MAX UINT64_MAX
#define SIZE_MAX UINT64_MAX

#endif
"#;

const STDIO_H: &str = r#"#ifndef __STDIO_H
#define __STDIO_H

#include <stddef.h>
#include <stdarg.h>

typedef struct _IO_FILE FILE;

extern FILE *stdin;
extern FILE *stdout;
extern FILE *stderr;

#define EOF (-1)
#define SEEK_SET 0
#define SEEK_CUR 1
#define SEEK_END 2
#define BUFSIZ 8192

FILE *fopen(const char *path, const char *mode);
FILE *freopen(const char *path, const char *mode, FILE *stream);
int fclose(FILE *stream);
int fflush(FILE *stream);
size_t fread(void *ptr, size_t size, size_t nmemb, FILE *stream);
size_t fwrite(const void *ptr, size_t size, size_t nmemb, FILE *stream);
int fseek(FILE *stream, long offset, int whence);
long ftell(FILE *stream);
int feof(FILE *stream);
int ferror(FILE *stream);

int printf(const char *fmt, ...);
int fprintf(FILE *stream, const char *fmt, ...);
int sprintf(char *str, const char *fmt, ...);
int snprintf(char *str, size_t size, const char *fmt, ...);
int vprintf(const char *fmt, va_list ap);
int vfprintf(FILE *stream, const char *fmt, va_list ap);
int vsnprintf(char *str, size_t size, const char *fmt, va_list ap);

int scanf(const char *fmt, ...);
int fscanf(FILE *stream, const char *fmt, ...);
int sscanf(const char *str, const char *fmt, ...);

int fgetc(FILE *stream);
int getc(FILE *stream);
int getchar(void);
char *fgets(char *s, int size, FILE *stream);
int fputc(int c, FILE *stream);
int putc(int c, FILE *stream);
int putchar(int c);
int fputs(const char *s, FILE *stream);
int puts(const char *s);
int ungetc(int c, FILE *stream);

int remove(const char *path);
int rename(const char *oldpath, const char *newpath);
void perror(const char *s);

#endif
"#;

const STDLIB_H: &str = r#"#ifndef __STDLIB_H
#define __STDLIB_H

#include <stddef.h>

#define EXIT_SUCCESS 0
#define EXIT_FAILURE 1
#define RAND_MAX 2147483647

void *malloc(size_t size);
void *calloc(size_t nmemb, size_t size);
void *realloc(void *ptr, size_t size);
void free(void *ptr);

void abort(void);
void exit(int status);
int atexit(void (*fn)(void));
char *getenv(const char *name);
int system(const char *command);

int abs(int x);
long labs(long x);
int atoi(const char *nptr);
long atol(const char *nptr);
double atof(const char *nptr);
long strtol(const char *nptr, char **endptr, int base);
unsigned long strtoul(const char *nptr, char **endptr, int base);
double strtod(const char *nptr, char **endptr);

int rand(void);
void srand(unsigned int seed);

void qsort(void *base, size_t nmemb, size_t size, int (*cmp)(const void *, const void *));
void *bsearch(const void *key, const void *base, size_t nmemb, size_t size,
              int (*cmp)(const void *, const void *));

#endif
"#;

const STRING_H: &str = r#"#ifndef __STRING_H
#define __STRING_H

#include <stddef.h>

void *memcpy(void *dest, const void *src, size_t n);
void *memmove(void *dest, const void *src, size_t n);
void *memset(void *s, int c, size_t n);
int memcmp(const void *s1, const void *s2, size_t n);
void *memchr(const void *s, int c, size_t n);

char *strcpy(char *dest, const char *src);
char *strncpy(char *dest, const char *src, size_t n);
char *strcat(char *dest, const char *src);
char *strncat(char *dest, const char *src, size_t n);
int strcmp(const char *s1, const char *s2);
int strncmp(const char *s1, const char *s2, size_t n);
char *strchr(const char *s, int c);
char *strrchr(const char *s, int c);
char *strstr(const char *haystack, const char *needle);
size_t strlen(const char *s);
char *strtok(char *str, const char *delim);
char *strdup(const char *s);
char *strerror(int errnum);
size_t strspn(const char *s, const char *accept);
size_t strcspn(const char *s, const char *reject);

#endif
"#;

const TIME_H: &str = r#"#ifndef __TIME_H
#define __TIME_H

#include <stddef.h>

typedef long time_t;
typedef long clock_t;

#define CLOCKS_PER_SEC 1000000L

struct tm {
    int tm_sec;
    int tm_min;
    int tm_hour;
    int tm_mday;
    int tm_mon;
    int tm_year;
    int tm_wday;
    int tm_yday;
    int tm_isdst;
};

clock_t clock(void);
time_t time(time_t *tloc);
double difftime(time_t end, time_t start);
struct tm *localtime(const time_t *timep);
struct tm *gmtime(const time_t *timep);
time_t mktime(struct tm *tm);
size_t strftime(char *s, size_t max, const char *fmt, const struct tm *tm);

#endif
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_expected_headers() {
        for name in [
            "stdio.h", "stdlib.h", "string.h", "stdint.h", "stddef.h", "stdbool.h", "stdarg.h",
            "math.h", "time.h", "assert.h",
        ] {
            assert!(get_std_header(name).is_some(), "missing {}", name);
        }
        assert!(get_std_header("unistd.h").is_none());
    }

    #[test]
    fn headers_carry_include_guards() {
        for name in header_names() {
            let text = get_std_header(name).unwrap();
            assert!(text.contains("#ifndef"), "{} lacks a guard", name);
            assert!(text.ends_with("#endif\n"), "{} guard is unterminated", name);
        }
    }

    #[test]
    fn stdint_matches_the_host_model() {
        let text = get_std_header("stdint.h").unwrap();
        assert!(text.contains("typedef long int64_t;"));
        assert!(text.contains("typedef unsigned long uintptr_t;"));
    }
}
